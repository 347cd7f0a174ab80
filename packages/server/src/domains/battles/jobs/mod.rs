mod crawl_battles;
mod fetch_kills;
mod notify_battle;

pub use crawl_battles::{CrawlBattlesHandler, CrawlBattlesJob};
pub use fetch_kills::{enqueue_mmr_calculation, FetchKillsHandler, FetchKillsJob};
pub use notify_battle::{NotifyBattleHandler, NotifyBattleJob};
