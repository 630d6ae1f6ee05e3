// ===============================
// src/codec.rs
// ===============================
//
// Two independent wire formats:
// - Quotes: fixed big-endian layout, IEEE-754 doubles + 16-byte NUL-padded
//   symbol. Two shapes coexist; which one a channel speaks is configured
//   explicitly (QuoteWire), never inferred from traffic.
// - Order intents: self-describing JSON, validated at decode time.
//
use serde::Deserialize;

use crate::domain::{OrderIntent, OrderType, Quote};
use crate::error::MalformedMessage;

pub const SYMBOL_LEN: usize = 16;

/// Quote wire shape discriminator.
/// `BidAsk`   = bid:f64 | ask:f64 | symbol:16s             (32 bytes)
/// `BidAskTs` = bid:f64 | ask:f64 | ts:f64 | symbol:16s    (40 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteWire {
    BidAsk,
    BidAskTs,
}

impl QuoteWire {
    pub fn frame_len(&self) -> usize {
        match self {
            QuoteWire::BidAsk => 16 + SYMBOL_LEN,
            QuoteWire::BidAskTs => 24 + SYMBOL_LEN,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bid_ask" | "bidask" => Some(QuoteWire::BidAsk),
            "bid_ask_ts" | "bidaskts" => Some(QuoteWire::BidAskTs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteWire::BidAsk => "bid_ask",
            QuoteWire::BidAskTs => "bid_ask_ts",
        }
    }
}

fn pad_symbol(symbol: &str) -> Result<[u8; SYMBOL_LEN], MalformedMessage> {
    let raw = symbol.as_bytes();
    if raw.len() > SYMBOL_LEN {
        return Err(MalformedMessage(format!(
            "symbol {:?} exceeds {} bytes",
            symbol, SYMBOL_LEN
        )));
    }
    let mut out = [0u8; SYMBOL_LEN];
    out[..raw.len()].copy_from_slice(raw);
    Ok(out)
}

fn unpad_symbol(raw: &[u8]) -> Result<String, MalformedMessage> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(|s| s.to_string())
        .map_err(|e| MalformedMessage(format!("symbol is not utf-8: {e}")))
}

pub fn encode_quote(q: &Quote, wire: QuoteWire) -> Result<Vec<u8>, MalformedMessage> {
    let sym = pad_symbol(&q.symbol)?;
    let mut buf = Vec::with_capacity(wire.frame_len());
    buf.extend_from_slice(&q.bid.to_be_bytes());
    buf.extend_from_slice(&q.ask.to_be_bytes());
    if wire == QuoteWire::BidAskTs {
        buf.extend_from_slice(&q.timestamp.unwrap_or(0.0).to_be_bytes());
    }
    buf.extend_from_slice(&sym);
    Ok(buf)
}

pub fn decode_quote(buf: &[u8], wire: QuoteWire) -> Result<Quote, MalformedMessage> {
    if buf.len() != wire.frame_len() {
        return Err(MalformedMessage(format!(
            "quote frame is {} bytes, {} expects {}",
            buf.len(),
            wire.as_str(),
            wire.frame_len()
        )));
    }
    let f64_at = |off: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[off..off + 8]);
        f64::from_be_bytes(b)
    };
    let bid = f64_at(0);
    let ask = f64_at(8);
    let (timestamp, sym_off) = match wire {
        QuoteWire::BidAsk => (None, 16),
        QuoteWire::BidAskTs => (Some(f64_at(16)), 24),
    };
    let symbol = unpad_symbol(&buf[sym_off..])?;
    Ok(Quote {
        bid,
        ask,
        timestamp,
        symbol,
    })
}

// Intent wire model: required fields fail closed at decode, optional ones get
// the original daemon's defaults. Unknown fields are ignored so strategies
// can grow the record without breaking older daemons.
#[derive(Deserialize)]
struct IntentModel {
    order_type: OrderType,
    symbol: String,
    price: f64,
    #[serde(default = "unknown_strategy")]
    strategy_name: String,
    #[serde(default)]
    timestamp: f64,
}

fn unknown_strategy() -> String {
    "unknown".to_string()
}

pub fn encode_intent(intent: &OrderIntent) -> Result<Vec<u8>, MalformedMessage> {
    serde_json::to_vec(intent).map_err(|e| MalformedMessage(format!("intent encode: {e}")))
}

pub fn decode_intent(buf: &[u8]) -> Result<OrderIntent, MalformedMessage> {
    let model: IntentModel = serde_json::from_slice(buf)
        .map_err(|e| MalformedMessage(format!("intent decode: {e}")))?;
    if !(model.price > 0.0) {
        return Err(MalformedMessage(format!(
            "intent price must be > 0, got {}",
            model.price
        )));
    }
    Ok(OrderIntent {
        order_type: model.order_type,
        symbol: model.symbol,
        price: model.price,
        strategy_name: model.strategy_name,
        timestamp: model.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(ts: Option<f64>) -> Quote {
        Quote {
            bid: 42123.25,
            ask: 42123.75,
            timestamp: ts,
            symbol: "BTCUSDT".to_string(),
        }
    }

    #[test]
    fn quote_roundtrip_bid_ask() {
        let q = quote(None);
        let buf = encode_quote(&q, QuoteWire::BidAsk).unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(decode_quote(&buf, QuoteWire::BidAsk).unwrap(), q);
    }

    #[test]
    fn quote_roundtrip_bid_ask_ts() {
        let q = quote(Some(1_700_000_000.5));
        let buf = encode_quote(&q, QuoteWire::BidAskTs).unwrap();
        assert_eq!(buf.len(), 40);
        assert_eq!(decode_quote(&buf, QuoteWire::BidAskTs).unwrap(), q);
    }

    #[test]
    fn symbol_is_nul_padded_and_trimmed() {
        let buf = encode_quote(&quote(None), QuoteWire::BidAsk).unwrap();
        assert_eq!(&buf[16..23], b"BTCUSDT");
        assert!(buf[23..].iter().all(|&b| b == 0));
        let q = decode_quote(&buf, QuoteWire::BidAsk).unwrap();
        assert_eq!(q.symbol, "BTCUSDT");
    }

    #[test]
    fn symbol_longer_than_field_fails_encode() {
        let mut q = quote(None);
        q.symbol = "THIS_SYMBOL_IS_TOO_LONG".to_string();
        assert!(encode_quote(&q, QuoteWire::BidAsk).is_err());
    }

    #[test]
    fn wrong_length_is_malformed() {
        let buf = encode_quote(&quote(None), QuoteWire::BidAsk).unwrap();
        // a bid_ask frame handed to a bid_ask_ts channel must be rejected
        assert!(decode_quote(&buf, QuoteWire::BidAskTs).is_err());
        assert!(decode_quote(&buf[..31], QuoteWire::BidAsk).is_err());
        assert!(decode_quote(&[], QuoteWire::BidAsk).is_err());
    }

    #[test]
    fn non_utf8_symbol_is_malformed() {
        let mut buf = encode_quote(&quote(None), QuoteWire::BidAsk).unwrap();
        buf[16] = 0xFF;
        buf[17] = 0xFE;
        assert!(decode_quote(&buf, QuoteWire::BidAsk).is_err());
    }

    #[test]
    fn intent_roundtrip() {
        let intent = OrderIntent {
            order_type: OrderType::Buy,
            symbol: "ETHUSDT".to_string(),
            price: 2_012.5,
            strategy_name: "ema_9_25".to_string(),
            timestamp: 1_700_000_001.0,
        };
        let buf = encode_intent(&intent).unwrap();
        assert_eq!(decode_intent(&buf).unwrap(), intent);
    }

    #[test]
    fn intent_defaults_for_optional_fields() {
        let intent =
            decode_intent(br#"{"order_type":"SELL","symbol":"BTCUSDT","price":99.5}"#).unwrap();
        assert_eq!(intent.order_type, OrderType::Sell);
        assert_eq!(intent.strategy_name, "unknown");
        assert_eq!(intent.timestamp, 0.0);
    }

    #[test]
    fn intent_unknown_fields_are_ignored() {
        let intent = decode_intent(
            br#"{"order_type":"BUY","symbol":"BTCUSDT","price":1.0,"leverage":10}"#,
        )
        .unwrap();
        assert_eq!(intent.symbol, "BTCUSDT");
    }

    #[test]
    fn intent_missing_or_invalid_fields_are_malformed() {
        // missing price
        assert!(decode_intent(br#"{"order_type":"BUY","symbol":"BTCUSDT"}"#).is_err());
        // wrong type for price
        assert!(
            decode_intent(br#"{"order_type":"BUY","symbol":"BTCUSDT","price":"1.0"}"#).is_err()
        );
        // unrecognized order_type
        assert!(decode_intent(br#"{"order_type":"HOLD","symbol":"X","price":1.0}"#).is_err());
        // non-positive price
        assert!(decode_intent(br#"{"order_type":"BUY","symbol":"X","price":0.0}"#).is_err());
        assert!(decode_intent(br#"{"order_type":"BUY","symbol":"X","price":-3.0}"#).is_err());
        // not json at all
        assert!(decode_intent(b"\x00\x01garbage").is_err());
    }
}
