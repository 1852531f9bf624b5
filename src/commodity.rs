//! Commodities are the types of flow exchanged between nodes (e.g. electricity, heat).
use crate::id::{NodeID, define_id_type};
use anyhow::{Result, bail, ensure};
use indexmap::IndexSet;
use itertools::Itertools;

define_id_type! {CommodityID}

/// A set of commodities, in insertion order
pub type CommoditySet = IndexSet<CommodityID>;

/// Format a set of commodities for error messages, e.g. `{'heat', 'power'}`.
///
/// The commodities are sorted so that messages are deterministic.
pub fn format_commodity_set<'a, I>(commodities: I) -> String
where
    I: IntoIterator<Item = &'a CommodityID>,
{
    let items = commodities
        .into_iter()
        .sorted()
        .map(|c| format!("'{c}'"))
        .join(", ");
    if items.is_empty() {
        "set()".into()
    } else {
        format!("{{{items}}}")
    }
}

/// The commodity-related properties of the two endpoints of a prospective edge
pub struct EdgeEnds<'a> {
    /// Name of the source node
    pub source: &'a NodeID,
    /// Commodities produced by the source node
    pub source_outputs: &'a CommoditySet,
    /// Name of the destination node
    pub destination: &'a NodeID,
    /// Commodity accepted by the destination node, if any
    pub destination_input: Option<&'a CommodityID>,
}

/// Work out which commodity flows along an edge.
///
/// | destination input | explicit commodity | result |
/// |---|---|---|
/// | none | any | error: destination accepts nothing |
/// | `c` | none | `c`, if the source produces it |
/// | `c` | `c` | `c`, if the source produces it |
/// | `c` | `d != c` | error: destination does not accept `d` |
pub fn resolve_edge_commodity(
    ends: &EdgeEnds,
    explicit: Option<&CommodityID>,
) -> Result<CommodityID> {
    let Some(input) = ends.destination_input else {
        bail!(
            "Destination node '{}' does not accept any input commodity, but it should",
            ends.destination
        );
    };

    // An explicit commodity can only confirm the destination input
    if let Some(explicit) = explicit {
        ensure!(
            explicit == input,
            "Destination node '{}' should accept commodity '{}', but it accepts '{}' only",
            ends.destination,
            explicit,
            input
        );
    }

    ensure!(
        ends.source_outputs.contains(input),
        "Parent node '{}' should return commodity '{}', but it returns {}",
        ends.source,
        input,
        format_commodity_set(ends.source_outputs)
    );

    Ok(input.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn outputs(items: &[&str]) -> CommoditySet {
        items.iter().map(|&c| c.into()).collect()
    }

    #[rstest]
    #[case(&[], "set()")]
    #[case(&["out"], "{'out'}")]
    #[case(&["b", "a"], "{'a', 'b'}")]
    fn test_format_commodity_set(#[case] items: &[&str], #[case] expected: &str) {
        assert_eq!(format_commodity_set(&outputs(items)), expected);
    }

    #[test]
    fn test_resolve_edge_commodity() {
        let source = NodeID::new("mac");
        let destination = NodeID::new("cli");
        let source_outputs = outputs(&["out"]);
        let out = CommodityID::new("out");
        let inp = CommodityID::new("in");

        let ends = EdgeEnds {
            source: &source,
            source_outputs: &source_outputs,
            destination: &destination,
            destination_input: Some(&out),
        };
        assert_eq!(resolve_edge_commodity(&ends, None).unwrap(), out);
        assert_eq!(resolve_edge_commodity(&ends, Some(&out)).unwrap(), out);
        assert_eq!(
            resolve_edge_commodity(&ends, Some(&inp))
                .unwrap_err()
                .to_string(),
            "Destination node 'cli' should accept commodity 'in', but it accepts 'out' only"
        );

        let ends = EdgeEnds {
            destination_input: Some(&inp),
            ..ends
        };
        assert_eq!(
            resolve_edge_commodity(&ends, None).unwrap_err().to_string(),
            "Parent node 'mac' should return commodity 'in', but it returns {'out'}"
        );

        let ends = EdgeEnds {
            destination_input: None,
            ..ends
        };
        assert_eq!(
            resolve_edge_commodity(&ends, None).unwrap_err().to_string(),
            "Destination node 'cli' does not accept any input commodity, but it should"
        );
    }
}
