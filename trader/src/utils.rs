pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// 拆分交易对为 (base, quote)
///
/// 支持 `BTC/USDT`、`BTC/USDT:USDT` 以及无分隔符的 `BTCUSDT` 写法，
/// 无分隔符时按常见计价资产后缀推断。
pub fn split_symbol(symbol: &str) -> (String, String) {
    if let Some((base, rest)) = symbol.split_once('/') {
        let quote = rest.split(':').next().unwrap_or(rest);
        return (base.to_string(), quote.to_string());
    }
    for quote in ["USDT", "USDC", "BUSD", "BTC", "ETH"] {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            return (symbol[..symbol.len() - quote.len()].to_string(), quote.to_string());
        }
    }
    let len = symbol.len();
    if len > 3 {
        (symbol[..len - 3].to_string(), symbol[len - 3..].to_string())
    } else {
        (symbol.to_string(), "USDT".to_string())
    }
}
