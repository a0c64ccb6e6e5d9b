//! Batch planning: deduplication, grouping by match flag and size-bounded
//! chunking of ingestion units.

use crate::model::{IngestionUnit, MatchFlag, UnitKey};
use std::collections::HashMap;
use tracing::debug;

/// Size limits applied to every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_units: usize,
    pub max_bytes: usize,
}

/// Estimated wire size of one unit.
pub fn estimate_size(unit: &IngestionUnit) -> usize {
    serde_json::to_vec(unit).map_or(0, |bytes| bytes.len())
}

/// Ordered, size-bounded group of units sharing one match flag, submitted as
/// a single bulk mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionBatch {
    match_flag: MatchFlag,
    units: Vec<IngestionUnit>,
    estimated_bytes: usize,
}

impl IngestionBatch {
    pub fn new(match_flag: MatchFlag) -> Self {
        Self {
            match_flag,
            units: Vec::new(),
            estimated_bytes: 0,
        }
    }

    pub fn match_flag(&self) -> MatchFlag {
        self.match_flag
    }

    pub fn units(&self) -> &[IngestionUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn estimated_bytes(&self) -> usize {
        self.estimated_bytes
    }

    /// Adds `unit` unless that would exceed `limits`, in which case the unit
    /// is handed back. An empty batch always accepts one unit so oversized
    /// units still get submitted.
    ///
    /// # Panics
    ///
    /// Debug builds assert that `unit` carries this batch's match flag.
    pub fn try_push(
        &mut self,
        unit: IngestionUnit,
        limits: BatchLimits,
    ) -> Result<(), IngestionUnit> {
        debug_assert_eq!(unit.match_flag, self.match_flag);
        let size = estimate_size(&unit);
        if !self.units.is_empty()
            && (self.units.len() >= limits.max_units
                || self.estimated_bytes + size > limits.max_bytes)
        {
            return Err(unit);
        }
        self.estimated_bytes += size;
        self.units.push(unit);
        Ok(())
    }

    pub fn into_units(self) -> Vec<IngestionUnit> {
        self.units
    }
}

/// Drops repeated (pkg, depPkg, matchFlag) units, keeping the first and
/// merging the annotations of later duplicates into it.
///
/// Only units are merged here; graph nodes sharing a `VersionKey` stay
/// distinct upstream.
pub fn dedup_units(units: Vec<IngestionUnit>) -> Vec<IngestionUnit> {
    let mut seen: HashMap<UnitKey, usize> = HashMap::with_capacity(units.len());
    let mut out: Vec<IngestionUnit> = Vec::with_capacity(units.len());
    for unit in units {
        match seen.get(&unit.key()) {
            Some(&pos) => {
                let kept = &mut out[pos];
                if kept.requirement() != unit.requirement() {
                    debug!(
                        unit = %kept,
                        dropped_requirement = unit.requirement(),
                        "Duplicate dependency with a different requirement"
                    );
                }
                for note in unit.annotations {
                    if !kept.annotations.contains(&note) {
                        kept.annotations.push(note);
                    }
                }
            }
            None => {
                seen.insert(unit.key(), out.len());
                out.push(unit);
            }
        }
    }
    out
}

/// Splits units into batches: ExactMatch units first, then RangeMatch,
/// each in input order and chunked by `limits`.
pub fn plan_batches(units: Vec<IngestionUnit>, limits: BatchLimits) -> Vec<IngestionBatch> {
    let (exact, range): (Vec<_>, Vec<_>) = units
        .into_iter()
        .partition(|u| u.match_flag == MatchFlag::ExactMatch);

    let mut batches = Vec::new();
    for (flag, group) in [(MatchFlag::ExactMatch, exact), (MatchFlag::RangeMatch, range)] {
        let mut current = IngestionBatch::new(flag);
        for unit in group {
            if let Err(unit) = current.try_push(unit, limits) {
                batches.push(std::mem::replace(&mut current, IngestionBatch::new(flag)));
                // An empty batch always takes one unit.
                let _ = current.try_push(unit, limits);
            }
        }
        if !current.is_empty() {
            batches.push(current);
        }
    }
    batches
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{DependencyAttributes, DependencyType, PackageSpec};

    pub(crate) fn spec(name: &str, version: &str) -> PackageSpec {
        PackageSpec {
            pkg_type: "npm".to_string(),
            namespace: None,
            name: name.to_string(),
            version: version.to_string(),
            scope: vec![],
        }
    }

    pub(crate) fn unit(dep: &str, flag: MatchFlag, requirement: &str) -> IngestionUnit {
        IngestionUnit {
            pkg: spec("root", "1.0.0"),
            dep_pkg: spec(dep, "1.0.0"),
            match_flag: flag,
            dependency: DependencyAttributes {
                version_range: requirement.to_string(),
                dependency_type: DependencyType::Direct,
                justification: "test".to_string(),
                origin: "test".to_string(),
                collector: "test".to_string(),
            },
            annotations: vec![],
        }
    }

    const WIDE: BatchLimits = BatchLimits {
        max_units: 100,
        max_bytes: usize::MAX,
    };

    #[test]
    fn test_groups_by_match_flag() {
        let units = vec![
            unit("a", MatchFlag::RangeMatch, "^1"),
            unit("b", MatchFlag::ExactMatch, "1.0.0"),
            unit("c", MatchFlag::RangeMatch, "~1.0"),
        ];
        let batches = plan_batches(units, WIDE);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].match_flag(), MatchFlag::ExactMatch);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[1].match_flag(), MatchFlag::RangeMatch);
        let names: Vec<&str> = batches[1].units().iter().map(|u| u.dep_pkg.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_chunks_by_unit_count() {
        let units: Vec<_> = (0..7)
            .map(|i| unit(&format!("d{i}"), MatchFlag::RangeMatch, "^1"))
            .collect();
        let limits = BatchLimits {
            max_units: 3,
            max_bytes: usize::MAX,
        };
        let sizes: Vec<usize> = plan_batches(units, limits).iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_chunks_by_bytes() {
        let one = unit("d", MatchFlag::RangeMatch, "^1");
        let size = estimate_size(&one);
        let limits = BatchLimits {
            max_units: 100,
            max_bytes: size * 2,
        };
        let units = vec![one.clone(), one.clone(), one.clone()];
        let batches = plan_batches(units, limits);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.estimated_bytes() <= size * 2));
    }

    #[test]
    fn test_oversized_unit_gets_own_batch() {
        let limits = BatchLimits {
            max_units: 10,
            max_bytes: 1,
        };
        let batches = plan_batches(
            vec![
                unit("a", MatchFlag::RangeMatch, "^1"),
                unit("b", MatchFlag::RangeMatch, "^1"),
            ],
            limits,
        );
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn test_dedup_merges_annotations() {
        let mut first = unit("a", MatchFlag::RangeMatch, "^1");
        first.annotations = vec!["x".to_string()];
        let mut second = unit("a", MatchFlag::RangeMatch, "~1.0");
        second.annotations = vec!["x".to_string(), "y".to_string()];
        let other_flag = unit("a", MatchFlag::ExactMatch, "1.0.0");

        let out = dedup_units(vec![first, second, other_flag]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].requirement(), "^1");
        assert_eq!(out[0].annotations, vec!["x", "y"]);
        assert_eq!(out[1].match_flag, MatchFlag::ExactMatch);
    }

    #[test]
    fn test_dedup_keeps_bundled_and_global_apart() {
        let global = unit("c", MatchFlag::RangeMatch, "^1");
        let mut bundled = global.clone();
        bundled.dep_pkg.scope = vec!["a".to_string(), "1.2.3".to_string()];
        assert_eq!(dedup_units(vec![global, bundled]).len(), 2);
    }
}
