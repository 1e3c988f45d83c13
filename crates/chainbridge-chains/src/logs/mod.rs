//! EVM-family log subscriptions (`<prefix>_subscribe("logs")` over
//! WebSocket, `<prefix>_getLogs` polling over RPC).

pub mod cursor;
pub mod dialect;
pub mod filter;
pub mod manager;
pub mod parser;

pub use cursor::LogCursor;
pub use dialect::{AddressFormat, LogDialect};
pub use filter::LogFilter;
pub use manager::LogsManager;
pub use parser::{LogEntry, LogParser};
