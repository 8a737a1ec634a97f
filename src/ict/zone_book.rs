use crate::models::StructureZone;
use std::collections::HashMap;

/// Zones remembered across cycles
///
/// Detectors only see the current candle window, so a zone mitigated by a candle
/// that has since scrolled out of the window would be reported fresh again. The
/// book keeps the first mitigation it saw for every zone id.
#[derive(Debug, Default)]
pub struct ZoneBook {
    zones: HashMap<String, StructureZone>,
    max_zones: usize,
}

impl ZoneBook {
    pub fn new(max_zones: usize) -> Self {
        Self {
            zones: HashMap::new(),
            max_zones,
        }
    }

    /// Merge freshly detected zones and return the merged view in `formed_at` order
    pub fn absorb(&mut self, detected: Vec<StructureZone>) -> Vec<StructureZone> {
        let mut current = Vec::with_capacity(detected.len());

        for mut zone in detected {
            match self.zones.get_mut(&zone.id) {
                Some(known) => {
                    if zone.mitigated {
                        if let Some(at) = zone.mitigated_at {
                            known.mitigate(at);
                        }
                    }
                    // A remembered mitigation always wins
                    if known.mitigated {
                        zone.mitigated = true;
                        zone.mitigated_at = known.mitigated_at;
                    }
                }
                None => {
                    self.zones.insert(zone.id.clone(), zone.clone());
                }
            }
            current.push(zone);
        }

        self.evict();

        current.sort_by_key(|z| z.formed_at);
        current
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    fn evict(&mut self) {
        if self.max_zones == 0 || self.zones.len() <= self.max_zones {
            return;
        }

        let mut by_age: Vec<_> = self
            .zones
            .values()
            .map(|z| (z.formed_at, z.id.clone()))
            .collect();
        by_age.sort();

        let excess = self.zones.len() - self.max_zones;
        for (_, id) in by_age.into_iter().take(excess) {
            self.zones.remove(&id);
        }
    }
}
