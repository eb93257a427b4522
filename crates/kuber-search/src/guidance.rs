//! Static guidance for common finance topics, used when live search fails.

/// A finance topic with pre-written guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinanceTopic {
    GoldPrice,
    Markets,
    Inflation,
}

const GOLD_PRICE_GUIDANCE: &str = "Current gold prices fluctuate daily. Check reliable financial \
websites like Economic Times, MoneyControl, or your bank's rates for the most accurate pricing. \
Digital gold platforms typically update rates every few minutes during market hours.";

const MARKETS_GUIDANCE: &str = "Stock markets change throughout trading hours. For real-time \
data, check NSE, BSE, or financial news websites like Economic Times, CNBC, or Bloomberg.";

const INFLATION_GUIDANCE: &str = "Inflation rates are published monthly by government \
statistics offices. In India, check RBI or Ministry of Statistics data for official figures.";

impl FinanceTopic {
    /// Matches a query against the known topics.
    ///
    /// Rules are checked in a fixed order (gold price, markets, inflation)
    /// and the first match wins. Matching is case-insensitive substring
    /// search; the gold rule needs "price" or "rate" as well as "gold".
    pub fn classify(query: &str) -> Option<Self> {
        let q = query.to_lowercase();

        if q.contains("gold") && (q.contains("price") || q.contains("rate")) {
            Some(Self::GoldPrice)
        } else if q.contains("stock") || q.contains("market") {
            Some(Self::Markets)
        } else if q.contains("inflation") {
            Some(Self::Inflation)
        } else {
            None
        }
    }

    pub fn guidance(self) -> &'static str {
        match self {
            Self::GoldPrice => GOLD_PRICE_GUIDANCE,
            Self::Markets => MARKETS_GUIDANCE,
            Self::Inflation => INFLATION_GUIDANCE,
        }
    }
}
