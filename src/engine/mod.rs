pub mod agent;
pub mod context;
pub mod directive;
pub mod graph;
pub mod llm;
pub mod templating;
pub mod tools;
pub mod workflow;

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
