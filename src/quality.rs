//! Tag detection quality checks
//!
//! Position traces of the apparatus tags hold zero (or a value below the
//! minimum position) wherever the tag was not detected. A session is suspect
//! when a tag disappears for too long at once or too often overall.

use crate::config::QualityConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tag whose detections fall outside the configured limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagGapIssue {
    pub tag_id: u32,
    /// Frames with a position below the minimum
    pub missed_detections: usize,
    /// Longest run of consecutive exact zeros
    pub longest_zero_run: usize,
}

/// Length of the longest run of exact zeros
pub fn longest_zero_run(data: &[f64]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for &value in data {
        if value == 0.0 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Check every tag's position trace; returns the offending tags in id order
pub fn check_tag_gaps(tags: &BTreeMap<u32, Vec<f64>>, config: &QualityConfig) -> Vec<TagGapIssue> {
    tags.iter()
        .filter_map(|(&tag_id, positions)| {
            let missed_detections = positions.iter().filter(|&&p| p < config.min_position).count();
            let longest_zero_run = longest_zero_run(positions);

            if longest_zero_run > config.max_zero_run || missed_detections > config.max_zero_total {
                tracing::warn!(tag_id, missed_detections, longest_zero_run, "tag detection gaps");
                Some(TagGapIssue {
                    tag_id,
                    missed_detections,
                    longest_zero_run,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_longest_zero_run() {
        assert_eq!(longest_zero_run(&[]), 0);
        assert_eq!(longest_zero_run(&[1.0, 2.0]), 0);
        assert_eq!(longest_zero_run(&[0.0, 1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0]), 3);
        // small but non-zero values do not extend a run
        assert_eq!(longest_zero_run(&[0.0, 0.05, 0.0]), 1);
    }

    #[test]
    fn test_clean_tags_pass() {
        let mut tags = BTreeMap::new();
        tags.insert(0, vec![0.5; 100]);
        let mut gappy = vec![0.5; 100];
        gappy[10..40].fill(0.0);
        tags.insert(1, gappy);

        assert!(check_tag_gaps(&tags, &QualityConfig::default()).is_empty());
    }

    #[test]
    fn test_long_gap_is_reported() {
        let mut positions = vec![0.5; 100];
        positions[10..41].fill(0.0);
        let mut tags = BTreeMap::new();
        tags.insert(0, vec![0.5; 100]);
        tags.insert(7, positions);

        let issues = check_tag_gaps(&tags, &QualityConfig::default());
        assert_eq!(
            issues,
            vec![TagGapIssue {
                tag_id: 7,
                missed_detections: 31,
                longest_zero_run: 31,
            }]
        );
    }

    #[test]
    fn test_many_missed_detections_are_reported() {
        // short dropouts, but too many of them
        let positions: Vec<f64> = (0..2000).map(|i| if i % 3 == 0 { 0.05 } else { 0.4 }).collect();
        let mut tags = BTreeMap::new();
        tags.insert(3, positions);

        let issues = check_tag_gaps(&tags, &QualityConfig::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].missed_detections, 667);
        assert_eq!(issues[0].longest_zero_run, 0);
    }
}
