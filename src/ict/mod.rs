// ICT market structure: swings, order blocks, fair value gaps, liquidity
pub mod fair_value_gaps;
pub mod liquidity;
pub mod order_blocks;
pub mod structure;
pub mod swings;
pub mod zone_book;

#[cfg(test)]
pub(crate) mod test_support;

pub use fair_value_gaps::FairValueGapDetector;
pub use liquidity::LiquidityDetector;
pub use order_blocks::OrderBlockDetector;
pub use structure::{BreakKind, MarketStructure, StructureAnalyzer, StructureBreak};
pub use zone_book::ZoneBook;

use crate::config::AnalysisSettings;
use crate::models::{Candle, StructureZone};

/// All detectors configured from the same settings
pub struct IctAnalyzer {
    pub structure: StructureAnalyzer,
    pub order_blocks: OrderBlockDetector,
    pub fair_value_gaps: FairValueGapDetector,
    pub liquidity: LiquidityDetector,
}

impl IctAnalyzer {
    pub fn from_settings(settings: &AnalysisSettings) -> Self {
        Self {
            structure: StructureAnalyzer::new(settings.lookback, settings.swing_strength),
            order_blocks: OrderBlockDetector::new(settings.lookback, settings.displacement_ratio),
            fair_value_gaps: FairValueGapDetector::new(settings.lookback, settings.min_gap_pct),
            liquidity: LiquidityDetector::new(
                settings.lookback,
                settings.swing_strength,
                settings.equal_level_tolerance_pct,
            ),
        }
    }

    /// Run every zone detector; result sorted by `formed_at`
    pub fn detect_zones(&self, candles: &[Candle]) -> Vec<StructureZone> {
        let mut zones = self.order_blocks.detect(candles);
        zones.extend(self.fair_value_gaps.detect(candles));
        zones.extend(self.liquidity.detect(candles));
        zones.sort_by_key(|z| z.formed_at);
        zones
    }
}

impl Default for IctAnalyzer {
    fn default() -> Self {
        Self::from_settings(&AnalysisSettings::default())
    }
}
