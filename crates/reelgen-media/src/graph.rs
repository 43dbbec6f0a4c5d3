//! Typed construction of `-filter_complex` graphs.
//!
//! A graph is a list of chains; a chain consumes zero or more labelled pads,
//! applies filters in order, and produces zero or more labelled pads. The
//! rendered text is the FFmpeg contract; building it from nodes keeps the
//! audio-present and audio-absent overlay variants to one conditional.

use std::fmt::Write as _;

/// One filter invocation, e.g. `scale=230:230`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    name: String,
    args: Option<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
        }
    }

    pub fn with_args(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Some(args.into()),
        }
    }

    fn render(&self, out: &mut String) {
        out.push_str(&self.name);
        if let Some(args) = &self.args {
            out.push('=');
            out.push_str(args);
        }
    }
}

/// A linear chain of filters between labelled pads.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    inputs: Vec<String>,
    filters: Vec<Filter>,
    outputs: Vec<String>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input pad label (without brackets), e.g. `"0:v"` or `"cam"`.
    pub fn input(mut self, label: impl Into<String>) -> Self {
        self.inputs.push(label.into());
        self
    }

    /// Append a filter without arguments.
    pub fn filter(mut self, name: impl Into<String>) -> Self {
        self.filters.push(Filter::new(name));
        self
    }

    /// Append a filter with arguments.
    pub fn filter_args(mut self, name: impl Into<String>, args: impl Into<String>) -> Self {
        self.filters.push(Filter::with_args(name, args));
        self
    }

    /// Add an output pad label (without brackets).
    pub fn output(mut self, label: impl Into<String>) -> Self {
        self.outputs.push(label.into());
        self
    }

    fn render(&self, out: &mut String) {
        for label in &self.inputs {
            let _ = write!(out, "[{}]", label);
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            filter.render(out);
        }
        for label in &self.outputs {
            let _ = write!(out, "[{}]", label);
        }
    }
}

/// A full filter graph.
#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chain(mut self, chain: FilterChain) -> Self {
        self.chains.push(chain);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Render to the `-filter_complex` argument string.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, chain) in self.chains.iter().enumerate() {
            if i > 0 {
                out.push(';');
            }
            chain.render(&mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_chain() {
        let graph = FilterGraph::new().chain(
            FilterChain::new()
                .input("1:v")
                .filter_args("setpts", "PTS-STARTPTS")
                .filter_args("scale", "230:230")
                .output("cam"),
        );
        assert_eq!(graph.render(), "[1:v]setpts=PTS-STARTPTS,scale=230:230[cam]");
    }

    #[test]
    fn test_multiple_chains_and_pads() {
        let graph = FilterGraph::new()
            .chain(
                FilterChain::new()
                    .input("2:v")
                    .filter("alphaextract")
                    .filter_args("split", "2")
                    .output("a1")
                    .output("a2"),
            )
            .chain(
                FilterChain::new()
                    .input("fc")
                    .input("a1")
                    .filter("alphamerge")
                    .output("cam"),
            );
        assert_eq!(
            graph.render(),
            "[2:v]alphaextract,split=2[a1][a2];[fc][a1]alphamerge[cam]"
        );
    }

    #[test]
    fn test_filter_without_args() {
        let graph =
            FilterGraph::new().chain(FilterChain::new().input("0:a").filter("anull").output("a"));
        assert_eq!(graph.render(), "[0:a]anull[a]");
    }
}
