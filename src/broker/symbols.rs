use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::broker::Broker;

/// Known alternative names, tried before the generated ones.
const MAPPINGS: &[(&str, &[&str])] = &[
    ("BTCUSD", &["BTCUSD", "XBTUSD", "BTCUSD.i", "BTCUSD-IDEAL"]),
    ("ETHBTC", &["ETHBTC", "ETHBTC.i", "ETH/BTC", "ETHUSD"]),
];

/// Broker names to try for `symbol`, without duplicates: mapped names first,
/// then the plain name, an `X` prefix, and `.i` / `-i` suffixes.
pub fn candidates_for(symbol: &str) -> Vec<String> {
    let mapped = MAPPINGS
        .iter()
        .find(|(k, _)| *k == symbol)
        .map(|(_, v)| *v)
        .unwrap_or(&[]);

    let generated = [
        symbol.to_string(),
        format!("X{}", symbol),
        format!("{}.i", symbol),
        format!("{}-i", symbol),
    ];

    let mut out: Vec<String> = Vec::new();
    for s in mapped.iter().map(|s| s.to_string()).chain(generated) {
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

/// First candidate the broker accepts.
pub async fn resolve_symbol(broker: &mut dyn Broker, symbol: &str) -> Result<String> {
    for candidate in candidates_for(symbol) {
        match broker.ensure_symbol(&candidate).await {
            Ok(()) => {
                if candidate != symbol {
                    info!("Resolved {} as {}", symbol, candidate);
                }
                return Ok(candidate);
            }
            Err(e) => debug!("{} not available: {}", candidate, e),
        }
    }
    bail!("no broker symbol found for {}", symbol)
}

/// The first of `known` that `broker_name` is a candidate spelling of.
pub fn canonical_name<'a, I>(broker_name: &str, known: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    known
        .into_iter()
        .find(|k| candidates_for(k).iter().any(|c| c == broker_name))
}

/// ISO currency legs of a six-letter FX-style symbol; `None` otherwise.
pub fn currency_legs(symbol: &str) -> Option<(&str, &str)> {
    let core: &str = symbol
        .split(|c: char| !c.is_ascii_alphanumeric())
        .next()
        .unwrap_or(symbol);
    if core.len() < 6 || !core.is_char_boundary(6) {
        return None;
    }
    let (base, quote) = (&core[..3], &core[3..6]);
    if base.chars().all(|c| c.is_ascii_alphabetic()) && quote.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((base, quote))
    } else {
        None
    }
}
