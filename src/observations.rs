//! Astrometric and radial-velocity measurements.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{OrbitError, Result};

/// Epochs above this are read as Julian dates and shifted to MJD.
pub const MJD_OFFSET: f64 = 2_400_000.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantityType {
    /// RA and Dec offsets, both in mas.
    RaDec,
    /// Separation in mas and position angle in degrees east of north.
    SepPa,
    /// Radial velocity in km/s, `quant2` is unused.
    Rv,
}

impl QuantityType {
    pub fn is_astrometric(&self) -> bool {
        !matches!(self, QuantityType::Rv)
    }
}

/// One measurement of one body at one epoch.
///
/// Deserialisation goes through [`ObservationRecord::new`]. Records assembled
/// from their fields are checked with [`ObservationRecord::validate`] when a
/// `System` is built from them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct ObservationRecord {
    /// MJD
    pub epoch: f64,
    pub object_id: u32,
    pub quant1: f64,
    pub quant1_err: f64,
    pub quant2: f64,
    pub quant2_err: f64,
    pub quant_type: QuantityType,
}

fn check_value(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(OrbitError::config(field, format!("expected a finite value, got {value}")));
    }
    Ok(())
}

fn check_error(field: &str, err: f64) -> Result<()> {
    if !(err.is_finite() && err > 0.) {
        return Err(OrbitError::config(
            field,
            format!("measurement errors must be positive, got {err}"),
        ));
    }
    Ok(())
}

#[derive(Deserialize)]
struct RawRecord {
    epoch: f64,
    object_id: u32,
    quant1: f64,
    quant1_err: f64,
    // RV rows serialise their unused NaN quantity as null
    #[serde(default)]
    quant2: Option<f64>,
    #[serde(default)]
    quant2_err: Option<f64>,
    quant_type: QuantityType,
}

impl TryFrom<RawRecord> for ObservationRecord {
    type Error = OrbitError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        Self::new(
            raw.epoch,
            raw.object_id,
            raw.quant_type,
            (raw.quant1, raw.quant1_err),
            (
                raw.quant2.unwrap_or(f64::NAN),
                raw.quant2_err.unwrap_or(f64::NAN),
            ),
        )
    }
}

impl ObservationRecord {
    /// Epochs above [`MJD_OFFSET`] are read as Julian dates.
    pub fn new(
        epoch: f64,
        object_id: u32,
        quant_type: QuantityType,
        (quant1, quant1_err): (f64, f64),
        (quant2, quant2_err): (f64, f64),
    ) -> Result<Self> {
        let epoch = if epoch > MJD_OFFSET {
            epoch - MJD_OFFSET
        } else {
            epoch
        };
        let (quant2, quant2_err) = if quant_type.is_astrometric() {
            (quant2, quant2_err)
        } else {
            (f64::NAN, f64::NAN)
        };
        let record = Self {
            epoch,
            object_id,
            quant1,
            quant1_err,
            quant2,
            quant2_err,
            quant_type,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check that the values are finite, the errors positive and the epoch an MJD.
    pub fn validate(&self) -> Result<()> {
        check_value("epoch", self.epoch)?;
        if self.epoch > MJD_OFFSET {
            return Err(OrbitError::config(
                "epoch",
                format!("expected an MJD, got {}", self.epoch),
            ));
        }
        check_value("quant1", self.quant1)?;
        check_error("quant1_err", self.quant1_err)?;
        if self.quant_type.is_astrometric() {
            check_value("quant2", self.quant2)?;
            check_error("quant2_err", self.quant2_err)?;
        }
        Ok(())
    }

    pub fn radec(epoch: f64, object_id: u32, ra: (f64, f64), dec: (f64, f64)) -> Result<Self> {
        Self::new(epoch, object_id, QuantityType::RaDec, ra, dec)
    }

    pub fn seppa(epoch: f64, object_id: u32, sep: (f64, f64), pa: (f64, f64)) -> Result<Self> {
        Self::new(epoch, object_id, QuantityType::SepPa, sep, pa)
    }

    pub fn rv(epoch: f64, object_id: u32, rv: (f64, f64)) -> Result<Self> {
        Self::new(epoch, object_id, QuantityType::Rv, rv, (f64::NAN, f64::NAN))
    }

    pub fn data(&self) -> [f64; 2] {
        [self.quant1, self.quant2]
    }

    pub fn errors(&self) -> [f64; 2] {
        [self.quant1_err, self.quant2_err]
    }

    /// Separation and position angle with their errors, `None` for RV rows.
    ///
    /// Returns `((sep, sep_err), (pa, pa_err))` in mas and degrees.
    pub fn as_seppa(&self) -> Option<((f64, f64), (f64, f64))> {
        match self.quant_type {
            QuantityType::SepPa => Some((
                (self.quant1, self.quant1_err),
                (self.quant2, self.quant2_err),
            )),
            QuantityType::RaDec => Some(radec_to_seppa_with_errors(
                (self.quant1, self.quant1_err),
                (self.quant2, self.quant2_err),
            )),
            QuantityType::Rv => None,
        }
    }
}

/// Separation (mas) and position angle (degrees in `[0, 360)`) of an offset.
pub fn radec_to_seppa(ra: f64, dec: f64) -> (f64, f64) {
    let sep = ra.hypot(dec);
    let pa = ra.atan2(dec).to_degrees().rem_euclid(360.);
    (sep, pa)
}

pub fn seppa_to_radec(sep: f64, pa: f64) -> (f64, f64) {
    let pa = pa.to_radians();
    (sep * pa.sin(), sep * pa.cos())
}

/// First order propagation of uncorrelated RA/Dec errors.
pub fn radec_to_seppa_with_errors(
    (ra, ra_err): (f64, f64),
    (dec, dec_err): (f64, f64),
) -> ((f64, f64), (f64, f64)) {
    let (sep, pa) = radec_to_seppa(ra, dec);
    let sep_err = ((ra * ra_err).powi(2) + (dec * dec_err).powi(2)).sqrt() / sep;
    let pa_err = ((dec * ra_err).powi(2) + (ra * dec_err).powi(2)).sqrt() / (sep * sep);
    ((sep, sep_err), (pa, pa_err.to_degrees()))
}

/// Difference of two angles in degrees, wrapped to `(-180, 180]`.
pub fn wrap_degrees(delta: f64) -> f64 {
    let rad = delta.to_radians();
    rad.sin().atan2(rad.cos()).to_degrees()
}

/// Angle in radians wrapped to `[0, 2 pi)`.
pub(crate) fn wrap_radians(angle: f64) -> f64 {
    angle.rem_euclid(2. * PI)
}

/// Ordered table of measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationTable {
    records: Vec<ObservationRecord>,
}

impl ObservationTable {
    pub fn new(records: Vec<ObservationRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: ObservationRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ObservationRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservationRecord> {
        self.records.iter()
    }

    pub fn epochs(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.epoch).collect()
    }

    /// Row indices of the measurements given as separation and position angle.
    pub fn seppa_indices(&self) -> Vec<usize> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.quant_type == QuantityType::SepPa)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Astrometric rows of one body.
    pub fn astrometry_for(&self, object_id: u32) -> impl Iterator<Item = &ObservationRecord> {
        self.records
            .iter()
            .filter(move |r| r.object_id == object_id && r.quant_type.is_astrometric())
    }
}

impl FromIterator<ObservationRecord> for ObservationTable {
    fn from_iter<T: IntoIterator<Item = ObservationRecord>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn julian_dates_become_mjd() {
        let rec = ObservationRecord::seppa(2_458_000.5, 1, (1000., 5.), (89., 0.1)).unwrap();
        assert_abs_diff_eq!(rec.epoch, 58_000.);
        let rec = ObservationRecord::seppa(58_000., 1, (1000., 5.), (89., 0.1)).unwrap();
        assert_abs_diff_eq!(rec.epoch, 58_000.);
    }

    #[test]
    fn rejects_bad_errors() {
        let err = ObservationRecord::radec(58_000., 1, (10., 0.), (5., 1.)).unwrap_err();
        assert!(matches!(err, OrbitError::Config { ref field, .. } if field == "quant1_err"));
        assert!(ObservationRecord::radec(58_000., 1, (10., 1.), (5., -1.)).is_err());
        assert!(ObservationRecord::seppa(f64::NAN, 1, (10., 1.), (5., 1.)).is_err());
        // RV rows ignore the second quantity
        let rv = ObservationRecord::rv(58_000., 1, (10., 0.1)).unwrap();
        assert!(rv.quant2.is_nan());
    }

    #[test]
    fn seppa_conversion() {
        let (sep, pa) = radec_to_seppa(1., 0.);
        assert_abs_diff_eq!(sep, 1.);
        assert_abs_diff_eq!(pa, 90., epsilon = 1e-12);
        let (_, pa) = radec_to_seppa(-1., -1e-12);
        assert!(pa > 180. && pa < 360.);
        let (ra, dec) = seppa_to_radec(2., 30.);
        let (sep, pa) = radec_to_seppa(ra, dec);
        assert_abs_diff_eq!(sep, 2., epsilon = 1e-12);
        assert_abs_diff_eq!(pa, 30., epsilon = 1e-9);
    }

    #[test]
    fn error_propagation_along_axes() {
        // purely east offset: sep error is the RA error, PA error is dec_err / sep
        let ((sep, sep_err), (pa, pa_err)) = radec_to_seppa_with_errors((100., 2.), (0., 3.));
        assert_abs_diff_eq!(sep, 100.);
        assert_abs_diff_eq!(sep_err, 2.);
        assert_abs_diff_eq!(pa, 90., epsilon = 1e-12);
        assert_abs_diff_eq!(pa_err, (0.03f64).to_degrees(), epsilon = 1e-12);
    }

    #[test]
    fn wrapping() {
        assert_abs_diff_eq!(wrap_degrees(350.), -10., epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_degrees(-190.), 170., epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_radians(-0.5), 2. * PI - 0.5, epsilon = 1e-12);
    }

    #[test]
    fn table_queries() {
        let table: ObservationTable = [
            ObservationRecord::radec(58_000., 1, (10., 1.), (5., 1.)).unwrap(),
            ObservationRecord::seppa(58_100., 1, (12., 1.), (60., 1.)).unwrap(),
            ObservationRecord::rv(58_200., 1, (3., 0.5)).unwrap(),
            ObservationRecord::seppa(58_300., 2, (40., 1.), (10., 1.)).unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(table.seppa_indices(), vec![1, 3]);
        assert_eq!(table.astrometry_for(1).count(), 2);
        assert_eq!(table.epochs(), vec![58_000., 58_100., 58_200., 58_300.]);
    }

    #[test]
    fn deserialisation_is_validated() {
        let json = r#"{"epoch": 2458000.5, "object_id": 1, "quant1": 10.0, "quant1_err": 1.0,
            "quant2": 5.0, "quant2_err": 1.0, "quant_type": "radec"}"#;
        let rec: ObservationRecord = serde_json::from_str(json).unwrap();
        assert_abs_diff_eq!(rec.epoch, 58_000.);

        let zero_err = json.replace("\"quant1_err\": 1.0", "\"quant1_err\": 0.0");
        assert!(serde_json::from_str::<ObservationRecord>(&zero_err).is_err());

        let rv = ObservationRecord::rv(58_000., 1, (3., 0.5)).unwrap();
        let text = serde_json::to_string(&rv).unwrap();
        let back: ObservationRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back.quant1, 3.);
        assert!(back.quant2.is_nan());
    }

    #[test]
    fn records_built_from_fields() {
        let mut rec = ObservationRecord::seppa(58_000., 1, (100., 1.), (45., 1.)).unwrap();
        assert!(rec.validate().is_ok());
        rec.quant2_err = 0.;
        assert!(matches!(
            rec.validate(),
            Err(OrbitError::Config { ref field, .. }) if field == "quant2_err"
        ));
        rec.quant2_err = 1.;
        rec.epoch = 2_458_000.5;
        assert!(rec.validate().is_err());
    }
}
