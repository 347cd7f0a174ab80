mod calculation_job;
mod calculation_log;
mod guild;
mod guild_season;
mod prime_time_mass;

pub use calculation_job::{MmrCalculationJob, MmrJobStatus};
pub use calculation_log::MmrCalculationLog;
pub use guild::{Guild, PLACEHOLDER_PREFIX};
pub use guild_season::{GuildSeason, DEFAULT_MMR};
pub use prime_time_mass::{next_mass, GuildPrimeTimeMass};
