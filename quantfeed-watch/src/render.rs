use quantfeed_data::protocol::ServerFrame;

/// Render `frame` as a single human readable line.
pub fn render(frame: &ServerFrame) -> String {
    match frame {
        ServerFrame::PriceUpdate(tick) => format!(
            "{} {:<12} {:>14.4} {:>+8.2}%  vol {:.2}",
            tick.timestamp.format("%H:%M:%S"),
            tick.symbol.as_str(),
            tick.price,
            tick.change_percent,
            tick.volume,
        ),
        ServerFrame::Signal(signal) => format!(
            "{} {:<12} {} conf {:.2} target {:.4} stop {:.4} [{}]",
            signal.generated_at.format("%H:%M:%S"),
            signal.symbol.as_str(),
            signal.direction,
            signal.confidence,
            signal.target_price,
            signal.stop_price,
            signal.reasoning.join("; "),
        ),
        ServerFrame::SubscriptionConfirmed { symbol, subscribed } => {
            let verb = if *subscribed { "subscribed" } else { "unsubscribed" };
            format!("{verb} {symbol}")
        }
        ServerFrame::Error { message } => format!("error: {message}"),
        ServerFrame::Pong => "pong".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use quantfeed_data::{instrument::Symbol, quote::PriceTick};

    #[test]
    fn test_render() {
        struct TestCase {
            input: ServerFrame,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0: price update
                input: ServerFrame::PriceUpdate(PriceTick {
                    symbol: Symbol::new("XYZ"),
                    price: 100.0,
                    change: 1.5,
                    change_percent: 1.5,
                    volume: 42.0,
                    source: "test".into(),
                    timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
                }),
                expected: "03:04:05 XYZ                100.0000    +1.50%  vol 42.00",
            },
            TestCase {
                // TC1: unsubscribe confirmation
                input: ServerFrame::SubscriptionConfirmed {
                    symbol: Symbol::new("XYZ"),
                    subscribed: false,
                },
                expected: "unsubscribed XYZ",
            },
            TestCase {
                // TC2: error
                input: ServerFrame::error("bad"),
                expected: "error: bad",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(render(&test.input), test.expected, "TC{} failed", index);
        }
    }
}
