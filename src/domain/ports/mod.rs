mod clock_port;
mod fetcher_port;
mod handle_port;
mod persistent_store_port;

pub use clock_port::ClockPort;
#[cfg(test)]
pub use fetcher_port::MockByteFetcherPort;
pub use fetcher_port::ByteFetcherPort;
pub use handle_port::HandleFactoryPort;
pub use persistent_store_port::PersistentStorePort;
