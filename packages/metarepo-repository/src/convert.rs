//! Format-conversion registry.
//!
//! The external conversion service is specified at its interface boundary:
//! direct format-to-format conversions are registered, and "can format A be
//! disseminated as format B" is reachability in the resulting graph
//! (conversions chain transitively). Every format converts to itself.

use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

#[derive(Default)]
pub struct ConversionRegistry {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    version: u64,
}

impl ConversionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, format: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(format) {
            return idx;
        }
        let idx = self.graph.add_node(format.to_string());
        self.nodes.insert(format.to_string(), idx);
        idx
    }

    /// Register a direct conversion from one format to another.
    pub fn add_conversion(&mut self, from: &str, to: &str) {
        let from = self.node(from);
        let to = self.node(to);
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
            self.version += 1;
        }
    }

    /// Whether `from` can be disseminated as `to`, directly or through a
    /// chain of conversions.
    pub fn can_convert(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        match (self.nodes.get(from), self.nodes.get(to)) {
            (Some(&a), Some(&b)) => has_path_connecting(&self.graph, a, b, None),
            _ => false,
        }
    }

    /// The subset of `candidates` reachable to the target format.
    pub fn formats_convertible_to<'a>(
        &self,
        target: &str,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> Vec<String> {
        candidates
            .into_iter()
            .filter(|f| self.can_convert(f, target))
            .map(String::from)
            .collect()
    }

    /// Formats reachable from the given native format (including itself).
    pub fn formats_convertible_from(&self, native: &str) -> Vec<String> {
        let mut out = vec![native.to_string()];
        for (format, &idx) in &self.nodes {
            if format != native {
                if let Some(&from) = self.nodes.get(native) {
                    if has_path_connecting(&self.graph, from, idx, None) {
                        out.push(format.clone());
                    }
                }
            }
        }
        out.sort();
        out
    }

    /// Bumped whenever a conversion is registered; dependent caches compare
    /// against it.
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_conversion() {
        let reg = ConversionRegistry::new();
        assert!(reg.can_convert("adn", "adn"));
        assert!(!reg.can_convert("adn", "oai_dc"));
    }

    #[test]
    fn test_transitive_closure() {
        let mut reg = ConversionRegistry::new();
        reg.add_conversion("adn", "nsdl_dc");
        reg.add_conversion("nsdl_dc", "oai_dc");

        assert!(reg.can_convert("adn", "nsdl_dc"));
        assert!(reg.can_convert("adn", "oai_dc"));
        assert!(!reg.can_convert("oai_dc", "adn"));
    }

    #[test]
    fn test_formats_convertible_to() {
        let mut reg = ConversionRegistry::new();
        reg.add_conversion("adn", "oai_dc");
        reg.add_conversion("anno", "oai_dc");

        let mut formats =
            reg.formats_convertible_to("oai_dc", ["adn", "anno", "news_opps", "oai_dc"]);
        formats.sort();
        assert_eq!(formats, ["adn", "anno", "oai_dc"]);

        assert!(reg
            .formats_convertible_to("adn", ["oai_dc", "news_opps"])
            .is_empty());
    }

    #[test]
    fn test_formats_convertible_from() {
        let mut reg = ConversionRegistry::new();
        reg.add_conversion("adn", "nsdl_dc");
        reg.add_conversion("nsdl_dc", "oai_dc");

        assert_eq!(
            reg.formats_convertible_from("adn"),
            ["adn", "nsdl_dc", "oai_dc"]
        );
        assert_eq!(reg.formats_convertible_from("oai_dc"), ["oai_dc"]);
    }

    #[test]
    fn test_version_bumps_once_per_edge() {
        let mut reg = ConversionRegistry::new();
        assert_eq!(reg.version(), 0);
        reg.add_conversion("adn", "oai_dc");
        assert_eq!(reg.version(), 1);
        reg.add_conversion("adn", "oai_dc");
        assert_eq!(reg.version(), 1);
    }
}
