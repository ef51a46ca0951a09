//! Side-aggregated rates for beam-separation scans.
//!
//! Channels are split into groups (by default the 8 telescopes on the -z side
//! and the 8 on the +z side). For every scan step the group's counts are summed
//! and divided by `measurementCount * groupSize`; once all steps are known each
//! group's series is normalized to its own maximum, so the groups can be
//! compared shape-for-shape.

use std::ops::Range;

use crate::domain::{CHANNEL_COUNT, DerivedSample, FileDataset, ScanStep};
use crate::error::{Diagnostic, PipelineError};
use crate::io::records::ScanFile;

/// Step indices expected to be head-on (zero separation) calibration points.
pub const HEAD_ON_STEPS: [i64; 2] = [0, 20];

/// Separations below this are considered head-on.
pub const HEAD_ON_TOLERANCE: f64 = 1e-4;

/// A named, non-empty range of readout channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelGroup {
    name: String,
    channels: Range<usize>,
}

impl ChannelGroup {
    /// Returns `None` for an empty range or one reaching past the last channel.
    pub fn new(name: impl Into<String>, channels: Range<usize>) -> Option<Self> {
        if channels.is_empty() || channels.end > CHANNEL_COUNT {
            return None;
        }
        Some(Self {
            name: name.into(),
            channels,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.channels.len()
    }

    fn total(&self, step: &ScanStep) -> u64 {
        step.channel_counts[self.channels.clone()].iter().sum()
    }
}

/// The -z / +z split of the 16 channels.
pub fn default_groups() -> Vec<ChannelGroup> {
    vec![
        ChannelGroup {
            name: "-z side".to_string(),
            channels: 0..CHANNEL_COUNT / 2,
        },
        ChannelGroup {
            name: "+z side".to_string(),
            channels: CHANNEL_COUNT / 2..CHANNEL_COUNT,
        },
    ]
}

/// Normalized per-group series of one scan file.
#[derive(Debug, Clone)]
pub struct SideRates {
    /// One dataset per group, in group order; `x` is the separation.
    pub groups: Vec<FileDataset>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Derive normalized side rates for a parsed scan.
///
/// Fails with `DegenerateNormalization` when a group never sees a hit.
pub fn derive_side_rates(scan: &ScanFile, label: &str, groups: &[ChannelGroup]) -> Result<SideRates, PipelineError> {
    let mut diagnostics = Vec::new();
    if let Some(err) = &scan.error {
        log::warn!("{}: keeping {} step(s) read before: {err}", scan.source, scan.steps.len());
        diagnostics.push(Diagnostic::new(scan.source.clone(), err.clone()));
    }

    // First pass: raw rates and running maxima.
    let mut separations = Vec::with_capacity(scan.steps.len());
    let mut raw: Vec<Vec<f64>> = vec![Vec::with_capacity(scan.steps.len()); groups.len()];
    let mut maxima = vec![0.0_f64; groups.len()];
    let mut first_begin: Option<i64> = None;
    let mut last_end: Option<i64> = None;

    for step in &scan.steps {
        if HEAD_ON_STEPS.contains(&step.step_index) {
            if step.separation.abs() < HEAD_ON_TOLERANCE {
                continue;
            }
            log::warn!(
                "{}: step {} is not head-on as expected (separation {})",
                scan.source,
                step.step_index,
                step.separation
            );
        }

        if !(step.measurement_count.is_finite() && step.measurement_count > 0.0) {
            let err = PipelineError::DivisionByZero {
                what: format!("measurementCount is {}", step.measurement_count),
            };
            log::warn!("{}: step {} excluded: {err}", scan.source, step.step_index);
            diagnostics.push(Diagnostic {
                source: scan.source.clone(),
                step: usize::try_from(step.step_index).ok(),
                error: err,
            });
            continue;
        }

        separations.push(step.separation);
        for (g, group) in groups.iter().enumerate() {
            let rate = group.total(step) as f64 / (step.measurement_count * group.size() as f64);
            maxima[g] = maxima[g].max(rate);
            raw[g].push(rate);
        }
        first_begin.get_or_insert(step.time_begin);
        last_end = Some(step.time_end);
    }

    // Second pass: normalize each group by its maximum.
    let mut out = Vec::with_capacity(groups.len());
    for ((group, rates), max) in groups.iter().zip(raw).zip(maxima) {
        if max <= 0.0 {
            return Err(PipelineError::DegenerateNormalization {
                group: group.name().to_string(),
            });
        }
        let samples = separations
            .iter()
            .zip(rates)
            .map(|(&sep, rate)| DerivedSample::new(sep, rate / max, 0.0))
            .collect();
        out.push(FileDataset {
            source: scan.source.clone(),
            label: format!("{label} ({})", group.name()),
            fit_enabled: false,
            time_span: first_begin.zip(last_end),
            samples,
        });
    }

    Ok(SideRates {
        groups: out,
        diagnostics,
    })
}
