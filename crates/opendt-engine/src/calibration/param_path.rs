//! Dotted parameter paths with wildcards.
//!
//! A path like `clusters[*].hosts[*].cpuPowerModel.asymUtil` names a set of
//! numeric leaves in the topology tree. Segments are field names against the
//! wire (camelCase) representation, optionally selecting all elements
//! (`[*]`) or one element (`[3]`) of an array field. Patching works on a
//! fresh deep copy, leaving the source topology untouched.

use serde_json::Value;

use opendt_types::Topology;

/// A path that fails to parse or resolve is a startup configuration error
/// for the calibration engine.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PathError {
    #[error("invalid path segment '{0}'")]
    Parse(String),

    #[error("field '{0}' not found")]
    MissingField(String),

    #[error("field '{0}' is not an array")]
    NotAnArray(String),

    #[error("array index {index} out of bounds for field '{field}'")]
    IndexOutOfBounds { field: String, index: usize },

    #[error("leaf at '{0}' is not a number")]
    NotANumber(String),

    #[error("path resolves to no leaves")]
    NoLeaves,

    #[error("patched topology no longer deserializes: {0}")]
    Rebuild(String),
}

#[derive(Debug, Clone, PartialEq)]
enum IndexSel {
    All,
    At(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    field: String,
    index: Option<IndexSel>,
}

/// A parsed parameter path.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamPath {
    raw: String,
    segments: Vec<Segment>,
}

impl ParamPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.trim().is_empty() {
            return Err(PathError::Parse(path.to_string()));
        }
        let segments = path
            .split('.')
            .map(parse_segment)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Deep-copy `topology` and set every resolved leaf to `value`.
    pub fn patch(&self, topology: &Topology, value: f64) -> Result<Topology, PathError> {
        let mut tree = serde_json::to_value(topology)
            .map_err(|e| PathError::Rebuild(e.to_string()))?;
        let patched = apply(&mut tree, &self.segments, value, &self.raw)?;
        if patched == 0 {
            return Err(PathError::NoLeaves);
        }
        serde_json::from_value(tree).map_err(|e| PathError::Rebuild(e.to_string()))
    }

    /// How many leaves the path resolves against `topology`; used to reject
    /// a bad path at startup before any epoch runs.
    pub fn resolve_count(&self, topology: &Topology) -> Result<usize, PathError> {
        let mut tree = serde_json::to_value(topology)
            .map_err(|e| PathError::Rebuild(e.to_string()))?;
        // Probing with the current value of each leaf would need a read-only
        // walk; writing 0.0 into a throwaway copy counts the same leaves.
        apply(&mut tree, &self.segments, 0.0, &self.raw)
    }
}

fn parse_segment(part: &str) -> Result<Segment, PathError> {
    let (field, index) = match part.find('[') {
        Some(bracket) => {
            let field = &part[..bracket];
            let rest = &part[bracket..];
            let inner = rest
                .strip_prefix('[')
                .and_then(|r| r.strip_suffix(']'))
                .ok_or_else(|| PathError::Parse(part.to_string()))?;
            let sel = if inner == "*" {
                IndexSel::All
            } else {
                IndexSel::At(
                    inner
                        .parse::<usize>()
                        .map_err(|_| PathError::Parse(part.to_string()))?,
                )
            };
            (field, Some(sel))
        }
        None => (part, None),
    };
    if field.is_empty() || !field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PathError::Parse(part.to_string()));
    }
    Ok(Segment {
        field: field.to_string(),
        index,
    })
}

/// Walk `segments` through `value`, setting resolved numeric leaves to
/// `new_value`. Returns the number of leaves patched.
fn apply(
    value: &mut Value,
    segments: &[Segment],
    new_value: f64,
    raw: &str,
) -> Result<usize, PathError> {
    let Some((segment, rest)) = segments.split_first() else {
        return match value {
            Value::Number(_) => {
                *value = Value::from(new_value);
                Ok(1)
            }
            _ => Err(PathError::NotANumber(raw.to_string())),
        };
    };

    let child = value
        .get_mut(&segment.field)
        .ok_or_else(|| PathError::MissingField(segment.field.clone()))?;

    match &segment.index {
        None => apply(child, rest, new_value, raw),
        Some(sel) => {
            let Value::Array(items) = child else {
                return Err(PathError::NotAnArray(segment.field.clone()));
            };
            match sel {
                IndexSel::All => {
                    let mut count = 0;
                    for item in items.iter_mut() {
                        count += apply(item, rest, new_value, raw)?;
                    }
                    Ok(count)
                }
                IndexSel::At(i) => {
                    let len = items.len();
                    let item = items.get_mut(*i).ok_or(PathError::IndexOutOfBounds {
                        field: segment.field.clone(),
                        index: (*i).min(len),
                    })?;
                    apply(item, rest, new_value, raw)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opendt_types::{Cluster, Cpu, CpuPowerModel, Host, Memory, PowerModelType};

    fn topology() -> Topology {
        let host = |name: &str| Host {
            name: name.into(),
            count: 2,
            cpu: Cpu {
                core_count: 16,
                core_speed: 2_400.0,
            },
            memory: Memory {
                memory_size: 64_000_000_000,
            },
            cpu_power_model: CpuPowerModel {
                model_type: PowerModelType::Asymptotic,
                power: 300.0,
                idle_power: 100.0,
                max_power: 450.0,
                asym_util: 0.3,
                dvfs: false,
            },
        };
        Topology {
            clusters: vec![
                Cluster {
                    name: "C01".into(),
                    power_source: None,
                    hosts: vec![host("H01"), host("H02")],
                },
                Cluster {
                    name: "C02".into(),
                    power_source: None,
                    hosts: vec![host("H03")],
                },
            ],
        }
    }

    #[test]
    fn wildcard_path_patches_every_host() {
        let path = ParamPath::parse("clusters[*].hosts[*].cpuPowerModel.asymUtil").unwrap();
        let base = topology();
        let patched = path.patch(&base, 0.9).unwrap();

        let leaves: Vec<f64> = patched
            .clusters
            .iter()
            .flat_map(|c| c.hosts.iter())
            .map(|h| h.cpu_power_model.asym_util)
            .collect();
        assert_eq!(leaves, vec![0.9, 0.9, 0.9]);
        // The source is untouched.
        assert_eq!(base.clusters[0].hosts[0].cpu_power_model.asym_util, 0.3);
    }

    #[test]
    fn indexed_path_patches_one_element() {
        let path = ParamPath::parse("clusters[0].hosts[1].cpuPowerModel.maxPower").unwrap();
        let patched = path.patch(&topology(), 999.0).unwrap();
        assert_eq!(patched.clusters[0].hosts[1].cpu_power_model.max_power, 999.0);
        assert_eq!(patched.clusters[0].hosts[0].cpu_power_model.max_power, 450.0);
        assert_eq!(patched.clusters[1].hosts[0].cpu_power_model.max_power, 450.0);
    }

    #[test]
    fn resolve_count_counts_leaves() {
        let path = ParamPath::parse("clusters[*].hosts[*].cpuPowerModel.asymUtil").unwrap();
        assert_eq!(path.resolve_count(&topology()).unwrap(), 3);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let path = ParamPath::parse("clusters[*].hosts[*].cpuPowerModel.frequency").unwrap();
        assert_eq!(
            path.patch(&topology(), 1.0),
            Err(PathError::MissingField("frequency".into()))
        );
    }

    #[test]
    fn non_numeric_leaf_is_rejected() {
        let path = ParamPath::parse("clusters[*].name").unwrap();
        assert!(matches!(
            path.patch(&topology(), 1.0),
            Err(PathError::NotANumber(_))
        ));
    }

    #[test]
    fn out_of_bounds_index_is_rejected() {
        let path = ParamPath::parse("clusters[5].hosts[*].cpuPowerModel.asymUtil").unwrap();
        assert!(matches!(
            path.patch(&topology(), 1.0),
            Err(PathError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn malformed_segments_fail_to_parse() {
        for bad in ["", "clusters[", "clusters[]", "clusters[x]", "a..b", "a[*"] {
            assert!(ParamPath::parse(bad).is_err(), "expected parse error: {bad}");
        }
    }

    #[test]
    fn patched_values_out_of_model_range_fail_rebuild_validation() {
        // asymUtil is a plain f64 on the wire; range checking happens in the
        // ingress validator, not serde, so a 0..1 overshoot still rebuilds.
        let path = ParamPath::parse("clusters[*].hosts[*].cpuPowerModel.asymUtil").unwrap();
        let patched = path.patch(&topology(), 0.75).unwrap();
        assert!(opendt_types::validate::validate_topology(&patched).is_ok());
    }
}
