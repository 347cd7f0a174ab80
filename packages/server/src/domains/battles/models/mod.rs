mod battle;
mod kill_event;
pub mod service_state;

pub use battle::Battle;
pub use kill_event::KillEvent;
pub use service_state::{advance_watermark, clamp_watermark, watermark, ServiceState, WATERMARK_KEY};
