mod prime_time_window;
mod season;

pub use prime_time_window::PrimeTimeWindow;
pub use season::Season;
