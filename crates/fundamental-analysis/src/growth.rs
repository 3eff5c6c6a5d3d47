/// Annualize two consecutive yearly growth rates (percent) into a single
/// compound rate (percent). `None` when a year shrinks by more than 100%.
pub fn two_year_annualized_growth(current_year_growth: f64, next_year_growth: f64) -> Option<f64> {
    let first = 1.0 + current_year_growth / 100.0;
    let second = 1.0 + next_year_growth / 100.0;
    if first < 0.0 || second < 0.0 {
        return None;
    }

    let annualized = ((first * second).sqrt() - 1.0) * 100.0;
    annualized.is_finite().then_some(annualized)
}

/// Enterprise value over earnings grown for two years at the annualized rate.
pub fn two_year_forward_pe(
    reconciled_ev: Option<f64>,
    adjusted_oi_after_tax: Option<f64>,
    two_year_growth: Option<f64>,
) -> Option<f64> {
    let ev = reconciled_ev?;
    let earnings = adjusted_oi_after_tax?;
    let growth = two_year_growth?;

    let forward_earnings = earnings * (1.0 + growth / 100.0).powi(2);
    if forward_earnings == 0.0 {
        return None;
    }

    let pe = ev / forward_earnings;
    pe.is_finite().then_some(pe)
}
