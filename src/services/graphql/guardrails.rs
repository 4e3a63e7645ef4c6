//! Structural limits on query documents
//!
//! Checked on the raw request before the schema executes anything, so a
//! rejected query never reaches a resolver or the store. Tokens are counted on
//! the raw text first; depth and aliases need the parsed document.

use std::collections::{HashMap, HashSet};

use async_graphql::parser::types::{ExecutableDocument, Selection, SelectionSet};
use tracing::warn;

use super::errors::{GuardrailKind, GuardrailViolation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardrailLimits {
    pub max_depth: usize,
    pub max_aliases: usize,
    pub max_tokens: usize,
}

impl Default for GuardrailLimits {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_aliases: 32,
            max_tokens: 4000,
        }
    }
}

impl GuardrailLimits {
    /// Reject `query` if it exceeds any limit.
    ///
    /// Documents that fail to parse, and documents whose fragments spread each
    /// other in a cycle, pass through; execution rejects them during validation
    /// without touching the store.
    pub fn check(&self, query: &str) -> Result<(), GuardrailViolation> {
        let tokens = count_tokens(query);
        exceeds(GuardrailKind::Tokens, tokens, self.max_tokens)?;

        let Ok(document) = async_graphql::parser::parse_query(query) else {
            return Ok(());
        };
        if has_fragment_cycle(&document) {
            return Ok(());
        }
        exceeds(GuardrailKind::Depth, document_depth(&document), self.max_depth)?;
        exceeds(GuardrailKind::Aliases, alias_count(&document), self.max_aliases)?;
        Ok(())
    }
}

fn exceeds(kind: GuardrailKind, actual: usize, max: usize) -> Result<(), GuardrailViolation> {
    if actual > max {
        warn!(%kind, actual, max, "Rejected query document");
        return Err(GuardrailViolation { kind, actual, max });
    }
    Ok(())
}

/// Number of lexical tokens in a GraphQL document.
///
/// Whitespace, commas and comments are ignored; a string (block or quoted) is
/// one token.
pub fn count_tokens(source: &str) -> usize {
    let bytes = source.as_bytes();
    let mut count = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' | b',' => i += 1,
            // UTF-8 byte order mark
            0xEF if bytes[i..].starts_with(&[0xEF, 0xBB, 0xBF]) => i += 3,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' && bytes[i] != b'\r' {
                    i += 1;
                }
            }
            b'"' if bytes[i..].starts_with(b"\"\"\"") => {
                i += 3;
                while i < bytes.len() && !bytes[i..].starts_with(b"\"\"\"") {
                    if bytes[i..].starts_with(b"\\\"\"\"") {
                        i += 4;
                    } else {
                        i += 1;
                    }
                }
                i = (i + 3).min(bytes.len());
                count += 1;
            }
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' && bytes[i] != b'\n' {
                    i += if bytes[i] == b'\\' { 2 } else { 1 };
                }
                i = (i + 1).min(bytes.len());
                count += 1;
            }
            b'.' if bytes[i..].starts_with(b"...") => {
                i += 3;
                count += 1;
            }
            b if b == b'_' || b.is_ascii_alphabetic() => {
                while i < bytes.len() && (bytes[i] == b'_' || bytes[i].is_ascii_alphanumeric()) {
                    i += 1;
                }
                count += 1;
            }
            b if b == b'-' || b.is_ascii_digit() => {
                i += 1;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'.' | b'+' | b'-'))
                {
                    i += 1;
                }
                count += 1;
            }
            // punctuators and anything the parser will reject
            _ => {
                i += 1;
                count += 1;
            }
        }
    }
    count
}

fn fragment_spreads<'a>(set: &'a SelectionSet, spreads: &mut Vec<&'a str>) {
    for item in &set.items {
        match &item.node {
            Selection::Field(field) => fragment_spreads(&field.node.selection_set.node, spreads),
            Selection::InlineFragment(fragment) => {
                fragment_spreads(&fragment.node.selection_set.node, spreads)
            }
            Selection::FragmentSpread(spread) => spreads.push(spread.node.fragment_name.node.as_str()),
        }
    }
}

/// Whether any fragment reaches itself through spreads.
pub fn has_fragment_cycle(document: &ExecutableDocument) -> bool {
    fn visit<'a>(
        name: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> bool {
        if done.contains(name) {
            return false;
        }
        if !visiting.insert(name) {
            return true;
        }
        let cyclic = edges
            .get(name)
            .is_some_and(|targets| targets.iter().any(|target| visit(*target, edges, visiting, done)));
        visiting.remove(name);
        done.insert(name);
        cyclic
    }

    let edges: HashMap<&str, Vec<&str>> = document
        .fragments
        .iter()
        .map(|(name, fragment)| {
            let mut spreads = Vec::new();
            fragment_spreads(&fragment.node.selection_set.node, &mut spreads);
            (name.as_str(), spreads)
        })
        .collect();

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    edges
        .keys()
        .any(|name| visit(*name, &edges, &mut visiting, &mut done))
}

/// Deepest field nesting across all operations, expanding fragment spreads.
///
/// A spread that re-enters a fragment already being expanded adds nothing.
pub fn document_depth(document: &ExecutableDocument) -> usize {
    let mut walker = DepthWalker {
        document,
        memo: HashMap::new(),
        visiting: HashSet::new(),
        truncated: false,
    };
    document
        .operations
        .iter()
        .map(|(_, operation)| walker.selection_set(&operation.node.selection_set.node))
        .max()
        .unwrap_or(0)
}

struct DepthWalker<'a> {
    document: &'a ExecutableDocument,
    memo: HashMap<&'a str, usize>,
    visiting: HashSet<&'a str>,
    /// Set when the current expansion was cut short by a cycle.
    truncated: bool,
}

impl<'a> DepthWalker<'a> {
    fn selection_set(&mut self, set: &'a SelectionSet) -> usize {
        set.items
            .iter()
            .map(|item| match &item.node {
                Selection::Field(field) => 1 + self.selection_set(&field.node.selection_set.node),
                Selection::InlineFragment(fragment) => {
                    self.selection_set(&fragment.node.selection_set.node)
                }
                Selection::FragmentSpread(spread) => self.fragment(spread.node.fragment_name.node.as_str()),
            })
            .max()
            .unwrap_or(0)
    }

    fn fragment(&mut self, name: &'a str) -> usize {
        if let Some(depth) = self.memo.get(name) {
            return *depth;
        }
        // cycles are rejected by validation later; count them as flat here
        if !self.visiting.insert(name) {
            self.truncated = true;
            return 0;
        }
        let outer_truncated = std::mem::take(&mut self.truncated);
        let document = self.document;
        let depth = document
            .fragments
            .iter()
            .find(|(fragment_name, _)| fragment_name.as_str() == name)
            .map(|(_, fragment)| self.selection_set(&fragment.node.selection_set.node))
            .unwrap_or(0);
        self.visiting.remove(name);
        // a cut-short depth depends on where the expansion entered the cycle
        if !self.truncated {
            self.memo.insert(name, depth);
        }
        self.truncated |= outer_truncated;
        depth
    }
}

/// Aliased fields as written in the document, fragments counted once.
pub fn alias_count(document: &ExecutableDocument) -> usize {
    fn count(set: &SelectionSet) -> usize {
        set.items
            .iter()
            .map(|item| match &item.node {
                Selection::Field(field) => {
                    usize::from(field.node.alias.is_some()) + count(&field.node.selection_set.node)
                }
                Selection::InlineFragment(fragment) => count(&fragment.node.selection_set.node),
                Selection::FragmentSpread(_) => 0,
            })
            .sum()
    }

    let in_operations: usize = document
        .operations
        .iter()
        .map(|(_, operation)| count(&operation.node.selection_set.node))
        .sum();
    let in_fragments: usize = document
        .fragments
        .values()
        .map(|fragment| count(&fragment.node.selection_set.node))
        .sum();
    in_operations + in_fragments
}
