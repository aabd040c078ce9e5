//! Trace matching: walking a graph against an observed trace.
//!
//! A trace is accepted when every line resolves to a template, each step has
//! a successor state carrying that template, and the final state has at least
//! one terminal successor. Rejection is an ordinary result
//! ([`MatchOutcome::Rejected`]), never an error: for anomaly detection a
//! failed match is the interesting signal.
//!
//! When several successors carry the same template the walk is ambiguous.
//! [`MatchMode::Random`] picks one uniformly with a caller-supplied RNG,
//! [`MatchMode::First`] takes the lowest handle, and
//! [`Graph::match_trace_all`] explores every branch.

use std::borrow::Cow;
use std::fmt;
use std::time::Instant;

use indexmap::IndexMap;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::graph::Graph;
use crate::id::StateId;

/// Seed used when the caller does not configure one.
pub const DEFAULT_SEED: u64 = 5;

/// Deterministic RNG for reproducible tie-breaking.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

// ---------------------------------------------------------------------------
// Template resolution
// ---------------------------------------------------------------------------

/// Maps a raw log line to its template id.
///
/// `None` means the line is unresolvable and rejects the trace at that line.
pub trait TemplateResolver {
    fn resolve<'a>(&'a self, line: &'a str) -> Option<Cow<'a, str>>;
}

impl<F> TemplateResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn resolve<'a>(&'a self, line: &'a str) -> Option<Cow<'a, str>> {
        self(line).map(Cow::Owned)
    }
}

/// Treats every line as its own template id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactResolver;

impl TemplateResolver for ExactResolver {
    fn resolve<'a>(&'a self, line: &'a str) -> Option<Cow<'a, str>> {
        Some(Cow::Borrowed(line))
    }
}

/// Explicit line to template map. Lines absent from the map are unresolvable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateTable {
    lines: IndexMap<String, String>,
}

impl TemplateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `line` to `template`, returning the previous template if any.
    pub fn insert(
        &mut self,
        line: impl Into<String>,
        template: impl Into<String>,
    ) -> Option<String> {
        self.lines.insert(line.into(), template.into())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl<L: Into<String>, T: Into<String>> FromIterator<(L, T)> for TemplateTable {
    fn from_iter<I: IntoIterator<Item = (L, T)>>(iter: I) -> Self {
        TemplateTable {
            lines: iter
                .into_iter()
                .map(|(line, template)| (line.into(), template.into()))
                .collect(),
        }
    }
}

impl TemplateResolver for TemplateTable {
    fn resolve<'a>(&'a self, line: &'a str) -> Option<Cow<'a, str>> {
        self.lines.get(line).map(|t| Cow::Borrowed(t.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

/// How an ambiguous step picks among matching successors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Uniformly at random.
    #[default]
    Random,
    /// The successor with the lowest handle.
    First,
}

/// Knobs for a single match.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions {
    pub mode: MatchMode,
    /// Give up once this instant has passed.
    pub deadline: Option<Instant>,
}

impl MatchOptions {
    pub fn first() -> Self {
        MatchOptions {
            mode: MatchMode::First,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Why a trace was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The line has no template.
    Unresolvable,
    /// No successor carries the line's template.
    NoMatch,
    /// The walk ended in a state without a terminal successor.
    NotTerminal,
    /// The deadline passed before the walk finished.
    DeadlineExceeded,
    /// A trace needs at least one line.
    EmptyTrace,
    /// The graph has no start state.
    NoStartState,
}

/// A rejected match: the offending line and the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Zero-based line index. For `NotTerminal` this is the last line.
    pub line: usize,
    pub reason: RejectReason,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            RejectReason::Unresolvable => "line has no template",
            RejectReason::NoMatch => "no state matches the line",
            RejectReason::NotTerminal => "trace cannot end here",
            RejectReason::DeadlineExceeded => "deadline exceeded",
            RejectReason::EmptyTrace => "trace is empty",
            RejectReason::NoStartState => "model has no start state",
        };
        write!(f, "rejected at line {}: {}", self.line, reason)
    }
}

/// Result of matching one trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Visited states, one per line.
    Matched { path: Vec<StateId> },
    Rejected(Rejection),
}

impl MatchOutcome {
    fn reject(line: usize, reason: RejectReason) -> Self {
        MatchOutcome::Rejected(Rejection { line, reason })
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    pub fn path(&self) -> Option<&[StateId]> {
        match self {
            MatchOutcome::Matched { path } => Some(path),
            MatchOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            MatchOutcome::Matched { .. } => None,
            MatchOutcome::Rejected(rejection) => Some(*rejection),
        }
    }
}

/// Every accepting path of a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllMatches {
    /// Accepting paths in ascending handle order.
    pub paths: Vec<Vec<StateId>>,
    /// `false` if the deadline cut the search short.
    pub complete: bool,
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

impl Graph {
    /// Successors of `id` whose template set contains `template`, ascending.
    /// Self-loops are candidates.
    fn candidates(&self, id: StateId, template: &str) -> Vec<StateId> {
        self.edges()
            .children_of(id.0)
            .into_iter()
            .map(|(destination, _)| StateId(destination))
            .filter(|&next| {
                self.state_properties(next)
                    .is_ok_and(|props| props.contains(template))
            })
            .collect()
    }

    /// Walks the graph from the start state along `trace`.
    pub fn match_trace<L, R, G>(
        &self,
        trace: &[L],
        resolver: &R,
        rng: &mut G,
        options: &MatchOptions,
    ) -> MatchOutcome
    where
        L: AsRef<str>,
        R: TemplateResolver + ?Sized,
        G: Rng + ?Sized,
    {
        if trace.is_empty() {
            return MatchOutcome::reject(0, RejectReason::EmptyTrace);
        }
        let Some(mut current) = self.start() else {
            return MatchOutcome::reject(0, RejectReason::NoStartState);
        };

        let mut path = Vec::with_capacity(trace.len());
        for (line_no, line) in trace.iter().enumerate() {
            if expired(options.deadline) {
                return MatchOutcome::reject(line_no, RejectReason::DeadlineExceeded);
            }
            let Some(template) = resolver.resolve(line.as_ref()) else {
                debug!(line = line_no, "unresolvable line");
                return MatchOutcome::reject(line_no, RejectReason::Unresolvable);
            };
            let candidates = self.candidates(current, &template);
            let chosen = match options.mode {
                MatchMode::First => candidates.first().copied(),
                MatchMode::Random => candidates.choose(rng).copied(),
            };
            let Some(next) = chosen else {
                debug!(
                    line = line_no,
                    state = %current,
                    template = %template,
                    "no matching successor"
                );
                return MatchOutcome::reject(line_no, RejectReason::NoMatch);
            };
            trace!(line = line_no, from = %current, to = %next, choices = candidates.len(), "step");
            path.push(next);
            current = next;
        }

        if !self.has_terminal_successor(current) {
            debug!(state = %current, "trace ended in a non-accepting state");
            return MatchOutcome::reject(trace.len() - 1, RejectReason::NotTerminal);
        }
        MatchOutcome::Matched { path }
    }

    /// Finds every accepting path of `trace` (nondeterministic automaton
    /// semantics). An empty or unresolvable trace has no paths.
    pub fn match_trace_all<L, R>(
        &self,
        trace: &[L],
        resolver: &R,
        deadline: Option<Instant>,
    ) -> AllMatches
    where
        L: AsRef<str>,
        R: TemplateResolver + ?Sized,
    {
        let mut result = AllMatches {
            paths: Vec::new(),
            complete: true,
        };
        let Some(start) = self.start() else {
            return result;
        };
        if trace.is_empty() {
            return result;
        }
        let mut templates = Vec::with_capacity(trace.len());
        for line in trace {
            match resolver.resolve(line.as_ref()) {
                Some(template) => templates.push(template),
                None => return result,
            }
        }

        // Depth-first over (depth, state) with an explicit path stack.
        // Children are pushed in reverse so paths come out in ascending order.
        let mut path: Vec<StateId> = Vec::with_capacity(trace.len());
        let mut stack: Vec<(usize, StateId)> = self
            .candidates(start, &templates[0])
            .into_iter()
            .rev()
            .map(|next| (0, next))
            .collect();

        while let Some((depth, state)) = stack.pop() {
            if expired(deadline) {
                result.complete = false;
                break;
            }
            path.truncate(depth);
            path.push(state);

            if depth + 1 == templates.len() {
                if self.has_terminal_successor(state) {
                    result.paths.push(path.clone());
                }
                continue;
            }
            for next in self.candidates(state, &templates[depth + 1]).into_iter().rev() {
                stack.push((depth + 1, next));
            }
        }

        debug!(paths = result.paths.len(), complete = result.complete, "matched all paths");
        result
    }
}
