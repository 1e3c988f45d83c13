//! Wire dialects of the EVM-family log APIs.

/// How the chain spells contract addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFormat {
    /// 20-byte hex, normalised to `0x` + 40 lowercase digits.
    Hex20,
    /// Passed through untouched (e.g. Conflux base32 addresses).
    Opaque,
}

/// Method names and range keys one chain family uses for log
/// subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogDialect {
    /// Registry name, matched against `Endpoint::chain`.
    pub chain: &'static str,
    /// Push subscription method, called as `<method>("logs", filter)`.
    pub subscribe_method: &'static str,
    /// Pull method, called as `<method>(filter)`.
    pub get_logs_method: &'static str,
    pub from_key: &'static str,
    pub to_key: &'static str,
    /// Name of the newest-position tag (`latest`, `latest_state`).
    pub latest_tag: &'static str,
    /// Log field that carries the block (or epoch) position.
    pub position_field: &'static str,
    pub address_format: AddressFormat,
}

const fn eth_style(chain: &'static str, prefix_subscribe: &'static str, prefix_get_logs: &'static str) -> LogDialect {
    LogDialect {
        chain,
        subscribe_method: prefix_subscribe,
        get_logs_method: prefix_get_logs,
        from_key: "fromBlock",
        to_key: "toBlock",
        latest_tag: "latest",
        position_field: "blockNumber",
        address_format: AddressFormat::Hex20,
    }
}

pub const ETHEREUM: LogDialect = eth_style("ethereum", "eth_subscribe", "eth_getLogs");
pub const BINANCE_SMART_CHAIN: LogDialect =
    eth_style("binance-smart-chain", "eth_subscribe", "eth_getLogs");
pub const XINFIN: LogDialect = eth_style("xinfin", "eth_subscribe", "eth_getLogs");
pub const HARMONY: LogDialect = eth_style("harmony", "hmy_subscribe", "hmy_getLogs");
pub const KLAYTN: LogDialect = eth_style("klaytn", "klay_subscribe", "klay_getLogs");

pub const CONFLUX: LogDialect = LogDialect {
    chain: "conflux",
    subscribe_method: "cfx_subscribe",
    get_logs_method: "cfx_getLogs",
    from_key: "fromEpoch",
    to_key: "toEpoch",
    latest_tag: "latest_state",
    position_field: "epochNumber",
    address_format: AddressFormat::Opaque,
};

/// Every built-in dialect.
pub const ALL: [LogDialect; 6] = [ETHEREUM, BINANCE_SMART_CHAIN, XINFIN, HARMONY, KLAYTN, CONFLUX];
