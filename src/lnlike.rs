use crate::observations::{wrap_degrees, ObservationTable, QuantityType};

/// Per-quantity chi-square terms `-0.5 * residual^2 / err^2`.
///
/// `model` holds one prediction per record in the units of the record.
/// Position angle residuals are wrapped before squaring and the unused second
/// quantity of RV rows contributes zero.
pub fn chi2_terms(table: &ObservationTable, model: &[[f64; 2]]) -> Vec<[f64; 2]> {
    assert!(model.len() == table.len());
    table
        .iter()
        .zip(model)
        .map(|(record, predicted)| {
            let data = record.data();
            let errors = record.errors();
            let mut out = [0f64; 2];
            for k in 0..2 {
                if data[k].is_nan() {
                    continue;
                }
                let mut residual = data[k] - predicted[k];
                if k == 1 && record.quant_type == QuantityType::SepPa {
                    residual = wrap_degrees(residual);
                }
                out[k] = -0.5 * residual * residual / (errors[k] * errors[k]);
            }
            out
        })
        .collect()
}

/// Total chi-square log likelihood, `-inf` if the model is not finite.
pub fn chi2_lnlike(table: &ObservationTable, model: &[[f64; 2]]) -> f64 {
    let total: f64 = chi2_terms(table, model)
        .iter()
        .map(|[a, b]| a + b)
        .sum();
    if total.is_finite() {
        total
    } else {
        f64::NEG_INFINITY
    }
}
