//! Semantic checks and lowering of parsed statements into rule data.

use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::form::SideFlags;
use crate::table::NameId;
use crate::table::rules::{Element, MAX_RULE_PART, OutputItem, Pass, PassKind, Rule, RuleSet};

use super::Reporter;
use super::parser::{Item, ItemKind, Member, RuleDecl, Side, Statement, StatementKind, Value};

/// Everything the table writer needs
#[derive(Debug, Clone)]
pub(crate) struct Lowered {
    pub rules: RuleSet,
    pub names: BTreeMap<NameId, Vec<u16>>,
    pub lhs_flags: SideFlags,
    pub rhs_flags: SideFlags,
}

#[derive(Debug)]
struct ClassDef {
    name: String,
    unicode: bool,
    members: Vec<u32>,
    line: u32,
    used: bool,
}

#[derive(Debug)]
struct PassBuilder {
    kind: PassKind,
    line: u32,
    classes: Vec<ClassDef>,
    byte_default: Option<u32>,
    uni_default: Option<u32>,
    pass_through: Vec<(u32, u32)>,
    forward: Vec<Rule>,
    reverse: Vec<Rule>,
    rule_lines: usize,
}

impl PassBuilder {
    fn new(kind: PassKind, line: u32) -> Self {
        Self {
            kind,
            line,
            classes: Vec::new(),
            byte_default: None,
            uni_default: None,
            pass_through: Vec::new(),
            forward: Vec::new(),
            reverse: Vec::new(),
            rule_lines: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Match,
    Pre,
    Post,
}

/// A rule side resolved against the pass's classes
#[derive(Debug, Default)]
struct Resolved {
    items: Vec<Element>,
    pre: Vec<Element>,
    post: Vec<Element>,
}

#[derive(Debug, Default)]
struct DeclaredFlags {
    flags: SideFlags,
    line: u32,
}

/// Lower `statements`, reporting every problem through `report`
pub(crate) fn lower(statements: &[Statement], report: &mut Reporter<'_>) -> Lowered {
    let mut names: BTreeMap<NameId, Vec<u16>> = BTreeMap::new();
    let mut passes: Vec<PassBuilder> = Vec::new();
    let mut lhs_declared = DeclaredFlags::default();
    let mut rhs_declared = DeclaredFlags::default();

    for statement in statements {
        let line = statement.line;
        match &statement.kind {
            StatementKind::Header { id, keyword, value } => {
                let units = value
                    .iter()
                    .filter_map(|&v| char::from_u32(v))
                    .flat_map(|c| {
                        let mut buf = [0u16; 2];
                        c.encode_utf16(&mut buf).to_vec()
                    })
                    .collect();
                if names.insert(*id, units).is_some() {
                    report.warning(line, "duplicate header, last value wins", Some(keyword));
                }
            }
            StatementKind::Flags { lhs, names: flag_names } => {
                let declared = if *lhs {
                    &mut lhs_declared
                } else {
                    &mut rhs_declared
                };
                for name in flag_names {
                    match SideFlags::from_name(name) {
                        Some(flag) => declared.flags |= flag,
                        None => report.error(line, "unknown flag", Some(name)),
                    }
                }
                declared.line = line;
            }
            StatementKind::Pass(kind) => passes.push(PassBuilder::new(*kind, line)),
            other => {
                if passes.is_empty() {
                    passes.push(PassBuilder::new(PassKind::ByteUnicode, line));
                }
                if let Some(pass) = passes.last_mut() {
                    pass_statement(pass, other, line, report);
                }
            }
        }
    }

    if passes.is_empty() {
        passes.push(PassBuilder::new(PassKind::ByteUnicode, 1));
    }
    for pair in passes.windows(2) {
        if pair[0].kind.rhs_is_unicode() != pair[1].kind.lhs_is_unicode() {
            report.error(
                pair[1].line,
                format!(
                    "pass reads {} but the previous pass writes {}",
                    side_name(pair[1].kind.lhs_is_unicode()),
                    side_name(pair[0].kind.rhs_is_unicode())
                ),
                Some(pair[1].kind.name()),
            );
        }
    }

    let lhs_unicode = passes.first().is_some_and(|p| p.kind.lhs_is_unicode());
    let rhs_unicode = passes.last().is_some_and(|p| p.kind.rhs_is_unicode());
    let lhs_flags = side_flags(&lhs_declared, lhs_unicode, "LHSFlags", report);
    let rhs_flags = side_flags(&rhs_declared, rhs_unicode, "RHSFlags", report);

    let mut conflicts = BTreeSet::new();
    let passes = passes
        .into_iter()
        .map(|builder| finish_pass(builder, &mut conflicts, report))
        .collect();

    Lowered {
        rules: RuleSet { passes },
        names,
        lhs_flags,
        rhs_flags,
    }
}

fn side_name(unicode: bool) -> &'static str {
    if unicode { "Unicode" } else { "bytes" }
}

fn side_flags(
    declared: &DeclaredFlags,
    unicode: bool,
    keyword: &str,
    report: &mut Reporter<'_>,
) -> SideFlags {
    let flags = declared.flags;
    if !unicode && !flags.normalization().is_empty() {
        report.error(
            declared.line,
            "normalization flags on a byte side",
            Some(keyword),
        );
    }
    if !unicode && flags.contains(SideFlags::UNICODE) {
        report.error(declared.line, "Unicode flag on a byte side", Some(keyword));
    }
    if flags.contains(SideFlags::EXPECTS_NFC | SideFlags::EXPECTS_NFD)
        || flags.contains(SideFlags::GENERATES_NFC | SideFlags::GENERATES_NFD)
    {
        report.error(declared.line, "flags ask for both NFC and NFD", Some(keyword));
    }
    let flags = flags.without(SideFlags::UNICODE);
    if unicode {
        flags | SideFlags::UNICODE
    } else {
        flags
    }
}

fn pass_statement(
    pass: &mut PassBuilder,
    statement: &StatementKind,
    line: u32,
    report: &mut Reporter<'_>,
) {
    match statement {
        StatementKind::Class {
            unicode,
            name,
            members,
        } => {
            if pass.classes.iter().any(|c| c.name == *name) {
                report.error(line, "duplicate class", Some(&format!("[{}]", name)));
                return;
            }
            let members = expand_members(members, *unicode, line, report);
            pass.classes.push(ClassDef {
                name: name.clone(),
                unicode: *unicode,
                members,
                line,
                used: false,
            });
        }
        StatementKind::Default {
            unicode,
            value,
            text,
        } => {
            let Some(value) = check_value(*value, *unicode, text, line, report) else {
                return;
            };
            if !pass.kind.is_mapping() {
                report.warning(line, "default ignored in non-mapping pass", Some(text));
            } else if *unicode {
                pass.uni_default = Some(value);
            } else {
                pass.byte_default = Some(value);
            }
        }
        StatementKind::PassThrough(ranges) => {
            if !pass.kind.is_mapping() {
                report.warning(line, "PassThrough ignored in non-mapping pass", None);
                return;
            }
            for member in ranges {
                let lo = member.first.raw();
                let hi = member.last.map_or(lo, Value::raw);
                if hi > 0xFF {
                    report.error(line, "pass-through range exceeds the byte range", Some(&member.text));
                } else if lo > hi {
                    report.error(line, "range is reversed", Some(&member.text));
                } else {
                    pass.pass_through.push((lo, hi));
                }
            }
        }
        StatementKind::Rule(decl) => {
            pass.rule_lines += 1;
            if pass.kind.is_normalization() {
                report.error(
                    line,
                    "rules are not allowed in a normalization pass",
                    Some(pass.kind.name()),
                );
                return;
            }
            add_rule(pass, decl, line, report);
        }
        StatementKind::Header { .. } | StatementKind::Flags { .. } | StatementKind::Pass(_) => {}
    }
}

/// Validate one written value against the form of its side
fn check_value(
    value: Value,
    unicode: bool,
    text: &str,
    line: u32,
    report: &mut Reporter<'_>,
) -> Option<u32> {
    let problem = match (value, unicode) {
        (Value::CodePoint(_), false) => Some("code point on a byte side"),
        (Value::Number(v) | Value::Char(v), false) if v > 0xFF => {
            Some("value exceeds the byte range")
        }
        (v, true) if char::from_u32(v.raw()).is_none() => {
            Some("value is not a Unicode scalar value")
        }
        _ => None,
    };
    match problem {
        Some(message) => {
            report.error(line, message, Some(text));
            None
        }
        None => Some(value.raw()),
    }
}

fn expand_members(
    members: &[Member],
    unicode: bool,
    line: u32,
    report: &mut Reporter<'_>,
) -> Vec<u32> {
    let mut values = Vec::new();
    for member in members {
        let Some(lo) = check_value(member.first, unicode, &member.text, line, report) else {
            continue;
        };
        let hi = match member.last {
            Some(last) => match check_value(last, unicode, &member.text, line, report) {
                Some(hi) => hi,
                None => continue,
            },
            None => lo,
        };
        if lo > hi {
            report.error(line, "range is reversed", Some(&member.text));
            continue;
        }
        values.extend((lo..=hi).filter(|&v| !unicode || char::from_u32(v).is_some()));
    }
    values
}

fn resolve_items(
    items: &[Item],
    position: Position,
    unicode: bool,
    classes: &mut [ClassDef],
    line: u32,
    report: &mut Reporter<'_>,
) -> Option<Vec<Element>> {
    let mut ok = true;
    let mut elements = Vec::with_capacity(items.len());
    let last = items.len().saturating_sub(1);
    for (i, item) in items.iter().enumerate() {
        let element = match &item.kind {
            ItemKind::Value(value) => {
                check_value(*value, unicode, &item.text, line, report).map(Element::Literal)
            }
            ItemKind::Class(name) => match classes.iter().position(|c| c.name == *name) {
                None => {
                    report.error(line, "unknown class", Some(&item.text));
                    None
                }
                Some(index) if classes[index].unicode != unicode => {
                    let message = if unicode {
                        "ByteClass used on a Unicode side"
                    } else {
                        "UniClass used on a byte side"
                    };
                    report.error(line, message, Some(&item.text));
                    None
                }
                Some(index) => {
                    classes[index].used = true;
                    u16::try_from(index).ok().map(Element::Class)
                }
            },
            ItemKind::Boundary => {
                let at_edge = match position {
                    Position::Match => false,
                    Position::Pre => i == 0,
                    Position::Post => i == last,
                };
                if at_edge {
                    Some(Element::Boundary)
                } else {
                    report.error(
                        line,
                        "boundary is only allowed at the outer edge of a context",
                        Some(&item.text),
                    );
                    None
                }
            }
        };
        match element {
            Some(element) => elements.push(element),
            None => ok = false,
        }
    }
    if elements.len() > MAX_RULE_PART {
        report.error(line, "rule part is too long", items.first().map(|i| i.text.as_str()));
        ok = false;
    }
    ok.then_some(elements)
}

fn resolve_side(
    side: &Side,
    unicode: bool,
    classes: &mut [ClassDef],
    line: u32,
    report: &mut Reporter<'_>,
) -> Option<Resolved> {
    let items = resolve_items(&side.items, Position::Match, unicode, classes, line, report);
    let pre = resolve_items(&side.pre, Position::Pre, unicode, classes, line, report);
    let post = resolve_items(&side.post, Position::Post, unicode, classes, line, report);
    Some(Resolved {
        items: items?,
        pre: pre?,
        post: post?,
    })
}

/// Pair class references of the output with class elements of the match
fn outputs(
    matched: &[Element],
    output: &[Element],
    classes: &[ClassDef],
    line: u32,
    report: &mut Reporter<'_>,
) -> Option<Vec<OutputItem>> {
    let sources: Vec<(usize, u16)> = matched
        .iter()
        .enumerate()
        .filter_map(|(pos, el)| match el {
            Element::Class(c) => Some((pos, *c)),
            _ => None,
        })
        .collect();
    let mut next_source = sources.iter();
    let mut items = Vec::with_capacity(output.len());
    for el in output {
        let item = match *el {
            Element::Literal(v) => OutputItem::Literal(v),
            Element::Class(class) => {
                let Some(&(pos, source)) = next_source.next() else {
                    report.error(
                        line,
                        "class in output has no corresponding class in the match",
                        Some(&format!("[{}]", classes[usize::from(class)].name)),
                    );
                    return None;
                };
                let from = &classes[usize::from(source)];
                let to = &classes[usize::from(class)];
                if from.members.len() > to.members.len() {
                    report.error(
                        line,
                        format!(
                            "class size mismatch: [{}] has {} members, [{}] has {}",
                            from.name,
                            from.members.len(),
                            to.name,
                            to.members.len()
                        ),
                        Some(&format!("[{}]", to.name)),
                    );
                    return None;
                }
                let source = u8::try_from(pos).ok()?;
                OutputItem::Class { class, source }
            }
            Element::Boundary => return None,
        };
        items.push(item);
    }
    Some(items)
}

fn add_rule(pass: &mut PassBuilder, decl: &RuleDecl, line: u32, report: &mut Reporter<'_>) {
    let lhs = resolve_side(&decl.lhs, pass.kind.lhs_is_unicode(), &mut pass.classes, line, report);
    let rhs = resolve_side(&decl.rhs, pass.kind.rhs_is_unicode(), &mut pass.classes, line, report);
    let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
        return;
    };

    let forward = decl.direction.forward();
    let backward = decl.direction.backward();
    if (forward && lhs.items.is_empty()) || (backward && rhs.items.is_empty()) {
        report.error(line, "empty match", None);
        return;
    }

    if forward
        && let Some(output) = outputs(&lhs.items, &rhs.items, &pass.classes, line, report)
    {
        pass.forward.push(Rule {
            pre: lhs.pre.clone(),
            matched: lhs.items.clone(),
            post: lhs.post.clone(),
            output,
            line,
        });
    }
    if backward
        && let Some(output) = outputs(&rhs.items, &lhs.items, &pass.classes, line, report)
    {
        pass.reverse.push(Rule {
            pre: rhs.pre,
            matched: rhs.items,
            post: rhs.post,
            output,
            line,
        });
    }
}

fn covers(a: Element, b: Element, sets: &[BTreeSet<u32>]) -> bool {
    let set = |c: u16| &sets[usize::from(c)];
    match (a, b) {
        (Element::Boundary, Element::Boundary) => true,
        (Element::Boundary, _) | (_, Element::Boundary) => false,
        (Element::Literal(x), Element::Literal(y)) => x == y,
        (Element::Class(c), Element::Literal(y)) => set(c).contains(&y),
        (Element::Literal(x), Element::Class(d)) => set(d).iter().all(|&v| v == x),
        (Element::Class(c), Element::Class(d)) => c == d || set(d).is_subset(set(c)),
    }
}

/// `earlier` accepts every input `later` accepts, under no stricter context
fn shadows(earlier: &Rule, later: &Rule, sets: &[BTreeSet<u32>]) -> bool {
    earlier.matched.len() == later.matched.len()
        && earlier.pre.len() <= later.pre.len()
        && earlier.post.len() <= later.post.len()
        && earlier
            .matched
            .iter()
            .zip(&later.matched)
            .all(|(&a, &b)| covers(a, b, sets))
        && earlier
            .pre
            .iter()
            .rev()
            .zip(later.pre.iter().rev())
            .all(|(&a, &b)| covers(a, b, sets))
        && earlier
            .post
            .iter()
            .zip(&later.post)
            .all(|(&a, &b)| covers(a, b, sets))
}

fn check_conflicts(
    rules: &[Rule],
    sets: &[BTreeSet<u32>],
    seen: &mut BTreeSet<(u32, u32)>,
    report: &mut Reporter<'_>,
) {
    let mut by_length: BTreeMap<usize, Vec<&Rule>> = BTreeMap::new();
    for rule in rules {
        by_length.entry(rule.matched.len()).or_default().push(rule);
    }
    for group in by_length.values() {
        for (i, later) in group.iter().enumerate() {
            if let Some(earlier) = group[..i].iter().find(|e| shadows(e, later, sets))
                && seen.insert((earlier.line, later.line))
            {
                report.error(
                    later.line,
                    format!("rule conflicts with the rule on line {}", earlier.line),
                    None,
                );
            }
        }
    }
}

fn finish_pass(
    mut builder: PassBuilder,
    conflicts: &mut BTreeSet<(u32, u32)>,
    report: &mut Reporter<'_>,
) -> Pass {
    if !builder.kind.is_normalization() && builder.rule_lines == 0 {
        report.warning(builder.line, "pass has no rules", Some(builder.kind.name()));
    }
    for class in builder.classes.iter().filter(|c| !c.used) {
        report.warning(class.line, "unused class", Some(&format!("[{}]", class.name)));
    }

    let sets: Vec<BTreeSet<u32>> = builder
        .classes
        .iter()
        .map(|c| c.members.iter().copied().collect())
        .collect();
    check_conflicts(&builder.forward, &sets, conflicts, report);
    check_conflicts(&builder.reverse, &sets, conflicts, report);

    // Longest match first; stable sort keeps declaration order otherwise
    builder
        .forward
        .sort_by(|a, b| b.matched.len().cmp(&a.matched.len()));
    builder
        .reverse
        .sort_by(|a, b| b.matched.len().cmp(&a.matched.len()));
    trace!(
        "pass {} lowered: {} forward, {} reverse rule(s)",
        builder.kind.name(),
        builder.forward.len(),
        builder.reverse.len()
    );

    let mut pass = Pass::new(builder.kind);
    match builder.kind {
        PassKind::ByteUnicode => {
            pass.lhs_default = builder.byte_default.unwrap_or(pass.lhs_default);
            pass.rhs_default = builder.uni_default.unwrap_or(pass.rhs_default);
        }
        PassKind::UnicodeByte => {
            pass.lhs_default = builder.uni_default.unwrap_or(pass.lhs_default);
            pass.rhs_default = builder.byte_default.unwrap_or(pass.rhs_default);
        }
        _ => {}
    }
    pass.classes = builder.classes.into_iter().map(|c| c.members).collect();
    pass.pass_through = builder.pass_through;
    pass.forward = builder.forward;
    pass.reverse = builder.reverse;
    pass
}
