#![allow(dead_code)]

use std::f64::consts::{PI, TAU};

use orbitfit::{
    radec_to_seppa, ObservationRecord, ObservationTable, OrbitModel, OrbitalElements,
    SkyPosition, DAYS_PER_YEAR,
};

/// km/s per AU/yr
const AU_PER_YEAR: f64 = 4.740470463;

/// Two-body Keplerian orbits projected on the sky.
pub struct KeplerModel {
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for KeplerModel {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            max_iter: 100,
        }
    }
}

impl KeplerModel {
    fn eccentric_anomaly(&self, mean_anomaly: f64, ecc: f64) -> f64 {
        let m = mean_anomaly.rem_euclid(TAU);
        let mut e = if ecc > 0.8 { PI } else { m };
        for _ in 0..self.max_iter {
            let step = (e - ecc * e.sin() - m) / (1. - ecc * e.cos());
            e -= step;
            if step.abs() < self.tolerance {
                break;
            }
        }
        e
    }
}

impl OrbitModel for KeplerModel {
    fn predict(&self, el: &OrbitalElements, epoch: f64) -> SkyPosition {
        let ecc_anom = self.eccentric_anomaly(el.mean_anomaly(epoch), el.ecc);
        let true_anom = 2.
            * ((1. + el.ecc).sqrt() * (ecc_anom / 2.).sin())
                .atan2((1. - el.ecc).sqrt() * (ecc_anom / 2.).cos());
        let radius = el.sma * (1. - el.ecc * ecc_anom.cos());

        let arg = el.aop + true_anom;
        let (sin_pan, cos_pan) = el.pan.sin_cos();
        let cos_inc = el.inc.cos();
        let ra = radius * el.plx * (sin_pan * arg.cos() + cos_inc * cos_pan * arg.sin());
        let dec = radius * el.plx * (cos_pan * arg.cos() - cos_inc * sin_pan * arg.sin());

        let mean_motion = TAU * DAYS_PER_YEAR / el.period_days();
        let semi_amplitude =
            mean_motion * el.sma * el.inc.sin() / (1. - el.ecc * el.ecc).sqrt() * AU_PER_YEAR;
        let rv = semi_amplitude * (arg.cos() + el.ecc * el.aop.cos());

        SkyPosition { ra, dec, rv }
    }
}

/// Elements loosely based on beta Pictoris b.
pub fn truth() -> OrbitalElements {
    OrbitalElements {
        sma: 9.66,
        ecc: 0.08,
        inc: 1.55,
        aop: 3.59,
        pan: 0.554,
        tau: 0.73,
        plx: 51.44,
        mtot: 1.8,
        tau_ref_epoch: 58_849.,
    }
}

/// Noise-free measurements of [`truth`] over one year, alternating between
/// separation/position angle and RA/Dec rows. The first row has the smallest
/// separation error.
pub fn observations(num_rows: usize) -> ObservationTable {
    let model = KeplerModel::default();
    let el = truth();
    (0..num_rows)
        .map(|i| {
            let epoch = 58_000. + 365. * i as f64 / num_rows as f64;
            let pos = model.predict(&el, epoch);
            let sep_err = if i == 0 { 5. } else { 10. };
            if i % 2 == 0 {
                let (sep, pa) = radec_to_seppa(pos.ra, pos.dec);
                ObservationRecord::seppa(epoch, 1, (sep, sep_err), (pa, 1.)).unwrap()
            } else {
                ObservationRecord::radec(epoch, 1, (pos.ra, 10.), (pos.dec, 10.)).unwrap()
            }
        })
        .collect()
}
