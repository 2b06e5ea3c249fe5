//! Rule execution for one pass in one direction.

use std::collections::{HashMap, VecDeque};

use log::trace;

use crate::table::rules::{Element, OutputItem, Pass, Rule};
use crate::{Error, Result};

/// Result of testing one rule at the head of the pending units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Matched,
    Failed,
    /// Lookahead ran off the available input
    Undecided,
    /// Input is complete and ended inside the match
    Truncated,
}

/// Streaming rewrite stage.
///
/// Units are matched at the head of `pending`. Consumed units move into
/// `history`, which is bounded by the longest left context of any rule.
#[derive(Debug, Clone)]
pub(crate) struct RuleStage {
    rules: Vec<Rule>,
    classes: Vec<Vec<u32>>,
    /// Member value to index, per class
    class_index: Vec<HashMap<u32, usize>>,
    /// First match value to candidate rules, in priority order
    dispatch: HashMap<u32, Vec<usize>>,
    mapping: bool,
    pass_through: Vec<(u32, u32)>,
    default: u32,
    strict: bool,
    max_pre: usize,
    pending: VecDeque<u32>,
    history: VecDeque<u32>,
    consumed: u64,
}

impl RuleStage {
    /// Build the stage for `pass` run in the given direction.
    ///
    /// A strict stage reports input that ends inside a rule's match as
    /// an incomplete character when the held unit has no mapping of its
    /// own, so it would otherwise become the default.
    pub fn new(pass: &Pass, forward: bool, strict: bool) -> Self {
        let rules = pass.rules(forward).to_vec();
        let class_index = pass
            .classes
            .iter()
            .map(|members| {
                let mut index = HashMap::with_capacity(members.len());
                for (i, &value) in members.iter().enumerate() {
                    index.entry(value).or_insert(i);
                }
                index
            })
            .collect();

        let mut dispatch: HashMap<u32, Vec<usize>> = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            let firsts: &[u32] = match rule.matched.first() {
                Some(Element::Literal(v)) => std::slice::from_ref(v),
                Some(Element::Class(c)) => pass
                    .classes
                    .get(usize::from(*c))
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                _ => &[],
            };
            for &value in firsts {
                let candidates = dispatch.entry(value).or_default();
                if candidates.last() != Some(&idx) {
                    candidates.push(idx);
                }
            }
        }

        let max_pre = rules.iter().map(|r| r.pre.len()).max().unwrap_or(0);
        let default = if forward {
            pass.rhs_default
        } else {
            pass.lhs_default
        };

        Self {
            rules,
            classes: pass.classes.clone(),
            class_index,
            dispatch,
            mapping: pass.kind.is_mapping(),
            pass_through: pass.pass_through.clone(),
            default,
            strict,
            max_pre,
            pending: VecDeque::new(),
            history: VecDeque::new(),
            consumed: 0,
        }
    }

    /// Units received but not yet rewritten
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.history.clear();
        self.consumed = 0;
    }

    /// Append `input` and rewrite as much as can be decided.
    ///
    /// On failure `out` still holds whatever was produced before the fault.
    pub fn process(&mut self, input: &[u32], complete: bool, out: &mut Vec<u32>) -> Result<()> {
        self.pending.extend(input);
        while let Some(&head) = self.pending.front() {
            let mut truncated = false;
            let mut fired = None;
            if let Some(candidates) = self.dispatch.get(&head) {
                for &idx in candidates {
                    match self.test(&self.rules[idx], complete) {
                        Outcome::Matched => {
                            fired = Some(idx);
                            break;
                        }
                        Outcome::Failed => {}
                        Outcome::Truncated => truncated = true,
                        // A higher-priority rule may still apply
                        Outcome::Undecided => return Ok(()),
                    }
                }
            }

            match fired {
                Some(idx) => self.fire(idx, out)?,
                None if truncated
                    && self.strict
                    && self.mapping
                    && !self.passes_through(head) =>
                {
                    return Err(Error::IncompleteChar {
                        input_read: 0,
                        input_used: 0,
                        output_used: 0,
                    });
                }
                None => {
                    out.push(self.unmatched(head));
                    self.advance(1);
                }
            }
        }
        Ok(())
    }

    fn passes_through(&self, unit: u32) -> bool {
        self.pass_through
            .iter()
            .any(|&(lo, hi)| (lo..=hi).contains(&unit))
    }

    fn unmatched(&self, unit: u32) -> u32 {
        if !self.mapping || self.passes_through(unit) {
            unit
        } else {
            self.default
        }
    }

    fn element_matches(&self, el: Element, unit: u32) -> bool {
        match el {
            Element::Literal(v) => v == unit,
            Element::Class(c) => self
                .class_index
                .get(usize::from(c))
                .is_some_and(|index| index.contains_key(&unit)),
            Element::Boundary => false,
        }
    }

    fn test(&self, rule: &Rule, complete: bool) -> Outcome {
        // Left context, nearest element first
        for (back, &el) in rule.pre.iter().rev().enumerate() {
            let distance = back + 1;
            let ok = match el {
                Element::Boundary => self.consumed == back as u64,
                _ => distance <= self.history.len()
                    && self.element_matches(el, self.history[self.history.len() - distance]),
            };
            if !ok {
                return Outcome::Failed;
            }
        }

        let available = self.pending.len();
        for (i, &el) in rule.matched.iter().enumerate() {
            if i >= available {
                return if complete {
                    Outcome::Truncated
                } else {
                    Outcome::Undecided
                };
            }
            if !self.element_matches(el, self.pending[i]) {
                return Outcome::Failed;
            }
        }

        for (j, &el) in rule.post.iter().enumerate() {
            let pos = rule.matched.len() + j;
            if pos >= available {
                return match (el, complete) {
                    (_, false) => Outcome::Undecided,
                    (Element::Boundary, true) => Outcome::Matched,
                    (_, true) => Outcome::Failed,
                };
            }
            if !self.element_matches(el, self.pending[pos]) {
                return Outcome::Failed;
            }
        }
        Outcome::Matched
    }

    fn fire(&mut self, idx: usize, out: &mut Vec<u32>) -> Result<()> {
        let rule = &self.rules[idx];
        for item in &rule.output {
            let value = match *item {
                OutputItem::Literal(v) => v,
                OutputItem::Class { class, source } => {
                    let source = usize::from(source);
                    let found = match rule.matched.get(source) {
                        Some(Element::Class(from)) => self
                            .class_index
                            .get(usize::from(*from))
                            .and_then(|index| index.get(&self.pending[source]))
                            .and_then(|&i| self.classes.get(usize::from(class))?.get(i)),
                        _ => None,
                    };
                    *found.ok_or_else(|| {
                        Error::Exception(format!(
                            "class correspondence of rule from line {} has no target",
                            rule.line
                        ))
                    })?
                }
            };
            out.push(value);
        }
        trace!(
            "rule from line {} fired at unit {}",
            rule.line, self.consumed
        );
        let len = rule.matched.len();
        self.advance(len);
        Ok(())
    }

    fn advance(&mut self, count: usize) {
        for _ in 0..count {
            let Some(unit) = self.pending.pop_front() else {
                break;
            };
            if self.max_pre > 0 {
                if self.history.len() == self.max_pre {
                    self.history.pop_front();
                }
                self.history.push_back(unit);
            }
            self.consumed += 1;
        }
    }
}
