mod calculate_mmr;

pub use calculate_mmr::{
    CalculateMmrHandler, CalculateMmrJob, ANTI_FARMING_WINDOW_DAYS, FALLBACK_DELTA,
};
