//! True/False normalization for legacy flat (QTI 1.2) quiz payloads.
//!
//! Each question item runs through a small state machine:
//!
//! ```text
//! Detect -> ValidateShape -> Map -> Apply -> Done(normalized)
//!                 |
//!                 +-> Fallback -> Done(converted-to-fallback | skipped)
//! ```
//!
//! Normalized items carry exactly the choice identifiers `true` and `false`,
//! and every answer-key reference names one of them. Items are never deleted.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::xml::{self, Element, Node};

pub const TRUE_WORD: &str = "true";
pub const FALSE_WORD: &str = "false";

const QUESTION_TYPE_LABEL: &str = "question_type";
const TWO_CHOICE_KIND: &str = "true_false_question";
const FALLBACK_KIND: &str = "multiple_choice_question";
const LEGACY_QUIZ_ROOT: &str = "questestinterop";

/// Evidence the choice mapping was derived from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MappingBasis {
    AlreadyCanonical,
    /// The correct identifier was itself a canonical word.
    AnswerKey,
    /// Both choices' displayed texts were the canonical words.
    LiteralText,
    /// No evidence: first choice became `true`, second `false`. May invert
    /// the correct answer.
    Positional,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ItemOutcome {
    Normalized { basis: MappingBasis },
    ConvertedToFallback { reason: String },
    Skipped { reason: String },
}

impl ItemOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ItemOutcome::Skipped { .. })
    }

    /// Items the verifier does not hold to the canonical pair.
    pub fn is_exempt(&self) -> bool {
        !matches!(self, ItemOutcome::Normalized { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// Ordinal of the item among all items of its document.
    pub index: usize,
    pub ident: Option<String>,
    pub outcome: ItemOutcome,
}

#[derive(Debug)]
struct Choice {
    ident: String,
    text: String,
}

#[derive(Debug)]
struct Shape {
    first: Choice,
    second: Choice,
    correct: String,
}

#[derive(Debug)]
struct Mapping {
    renames: [(String, &'static str); 2],
    basis: MappingBasis,
    /// Word the incorrect choice ends up with.
    incorrect: &'static str,
}

impl Mapping {
    fn new(renames: [(String, &'static str); 2], basis: MappingBasis, correct: &str) -> Self {
        let correct_word = renames
            .iter()
            .find(|(old, _)| old == correct)
            .map_or(TRUE_WORD, |(_, new)| *new);
        Self {
            incorrect: complement(correct_word),
            renames,
            basis,
        }
    }

    fn target_of(&self, ident: &str) -> Option<&'static str> {
        self.renames
            .iter()
            .find(|(old, _)| old == ident)
            .map(|(_, new)| *new)
    }
}

#[derive(Debug)]
enum Stage {
    Detect,
    ValidateShape,
    Map(Shape),
    Apply(Mapping),
    Fallback(String),
    Done(ItemOutcome),
}

/// Result of normalizing one payload document.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub items: Vec<ItemReport>,
    /// Rewritten document, present only when something changed.
    pub rewritten: Option<Vec<u8>>,
}

/// Normalizes every two-choice item in a legacy quiz payload. Returns `None`
/// for anything that is not a parsable `questestinterop` document.
pub fn normalize_payload(bytes: &[u8], fallback: bool) -> Option<DocumentOutcome> {
    let mut root = xml::parse(bytes).ok()?;
    if root.local_name() != LEGACY_QUIZ_ROOT {
        return None;
    }
    let (items, changed) = normalize_document(&mut root, fallback);
    Some(DocumentOutcome {
        items,
        rewritten: changed.then(|| xml::write(&root).into_bytes()),
    })
}

/// Runs the state machine over every item of `root`. Returns one report per
/// detected candidate and whether the tree was modified.
pub fn normalize_document(root: &mut Element, fallback: bool) -> (Vec<ItemReport>, bool) {
    let mut reports = Vec::new();
    let mut changed = false;
    let mut index = 0;
    for_each_item_mut(root, &mut |item: &mut Element| {
        let ordinal = index;
        index += 1;
        let ident = item.attr("ident").map(str::to_string);
        if let Some((outcome, modified)) = run_item(item, fallback) {
            changed |= modified;
            tracing::debug!(item = ?ident, index = ordinal, outcome = ?outcome, "two-choice item processed");
            reports.push(ItemReport {
                index: ordinal,
                ident,
                outcome,
            });
        }
    });
    (reports, changed)
}

fn run_item(item: &mut Element, fallback: bool) -> Option<(ItemOutcome, bool)> {
    let mut modified = false;
    let mut stage = Stage::Detect;
    loop {
        stage = match stage {
            Stage::Detect => {
                if !is_candidate(item) {
                    return None;
                }
                Stage::ValidateShape
            }
            Stage::ValidateShape => match validate_shape(item) {
                Ok(shape) => Stage::Map(shape),
                Err(reason) => Stage::Fallback(reason),
            },
            Stage::Map(shape) => Stage::Apply(map_choices(&shape)),
            Stage::Apply(mapping) => {
                modified |= apply(item, &mapping);
                modified |= strip_other_branches(item);
                Stage::Done(ItemOutcome::Normalized {
                    basis: mapping.basis,
                })
            }
            Stage::Fallback(reason) if fallback => {
                modified |= set_question_kind(item, FALLBACK_KIND);
                modified |= strip_other_branches(item);
                Stage::Done(ItemOutcome::ConvertedToFallback { reason })
            }
            Stage::Fallback(reason) => Stage::Done(ItemOutcome::Skipped { reason }),
            Stage::Done(outcome) => return Some((outcome, modified)),
        };
    }
}

/// Visits every `item` element in document order. Items are not searched
/// for nested items.
pub(crate) fn for_each_item_mut<F: FnMut(&mut Element)>(element: &mut Element, visit: &mut F) {
    for child in element.elements_mut() {
        if child.local_name() == "item" {
            visit(child);
        } else {
            for_each_item_mut(child, visit);
        }
    }
}

pub(crate) fn collect_items(element: &Element) -> Vec<&Element> {
    let mut items = Vec::new();
    push_items(element, &mut items);
    items
}

fn push_items<'a>(element: &'a Element, items: &mut Vec<&'a Element>) {
    for child in element.elements() {
        if child.local_name() == "item" {
            items.push(child);
        } else {
            push_items(child, items);
        }
    }
}

fn question_kind(item: &Element) -> Option<String> {
    item.find_all("qtimetadatafield").into_iter().find_map(|field| {
        let label = field.child("fieldlabel")?.text_content();
        (label.trim() == QUESTION_TYPE_LABEL)
            .then(|| field.child("fieldentry").map(|entry| entry.text_content().trim().to_string()))
            .flatten()
    })
}

fn set_question_kind(item: &mut Element, kind: &str) -> bool {
    let mut changed = false;
    item.walk_mut(&mut |el: &mut Element| {
        if el.local_name() != "qtimetadatafield" {
            return;
        }
        let is_kind_field = el
            .child("fieldlabel")
            .is_some_and(|label| label.text_content().trim() == QUESTION_TYPE_LABEL);
        if !is_kind_field {
            return;
        }
        if let Some(entry) = el.child_mut("fieldentry") {
            if entry.text_content().trim() != kind {
                entry.set_text(kind);
                changed = true;
            }
        }
    });
    changed
}

fn choice_labels(item: &Element) -> Vec<&Element> {
    item.find("response_lid")
        .map(|lid| lid.find_all("response_label"))
        .unwrap_or_default()
}

fn choice_text(label: &Element) -> String {
    label
        .find("mattext")
        .map(|text| text.text_content().trim().to_lowercase())
        .unwrap_or_default()
}

fn is_canonical_word(value: &str) -> bool {
    value.eq_ignore_ascii_case(TRUE_WORD) || value.eq_ignore_ascii_case(FALSE_WORD)
}

/// Declared as a two-choice question, or exactly two choices whose texts are
/// the two canonical words.
fn is_candidate(item: &Element) -> bool {
    if question_kind(item).is_some_and(|kind| kind.eq_ignore_ascii_case(TWO_CHOICE_KIND)) {
        return true;
    }
    let labels = choice_labels(item);
    labels.len() == 2 && {
        let texts: BTreeSet<String> = labels.iter().map(|label| choice_text(label)).collect();
        texts.len() == 2 && texts.iter().all(|text| is_canonical_word(text))
    }
}

/// Scoring conditions, each with the identifiers its condition tests and
/// whether it awards a positive score.
fn scoring_conditions(item: &Element) -> Vec<(Vec<String>, bool)> {
    item.find_all("respcondition")
        .into_iter()
        .map(|condition| {
            let refs = condition
                .child("conditionvar")
                .map(|var| {
                    var.find_all("varequal")
                        .into_iter()
                        .map(|eq| eq.text_content().trim().to_string())
                        .collect()
                })
                .unwrap_or_default();
            let awards = condition.find_all("setvar").into_iter().any(|set| {
                set.text_content()
                    .trim()
                    .parse::<f64>()
                    .is_ok_and(|score| score > 0.0)
            });
            (refs, awards)
        })
        .collect()
}

/// Answer-key references: identifiers tested by score-awarding conditions,
/// or by every condition when none sets a score.
fn answer_key_references(item: &Element) -> BTreeSet<String> {
    let conditions = scoring_conditions(item);
    let sets_scores = item.find("resprocessing").is_some_and(|rp| rp.find("setvar").is_some());
    conditions
        .into_iter()
        .filter(|(_, awards)| *awards || !sets_scores)
        .flat_map(|(refs, _)| refs)
        .filter(|value| !value.is_empty())
        .collect()
}

fn validate_shape(item: &Element) -> Result<Shape, String> {
    if item.find("response_lid").is_none() {
        return Err("no response_lid".to_string());
    }
    let labels = choice_labels(item);
    if labels.len() != 2 {
        return Err(format!("{} choices, expected 2", labels.len()));
    }
    let choices: Vec<Choice> = labels
        .iter()
        .map(|label| Choice {
            ident: label.attr("ident").unwrap_or_default().trim().to_string(),
            text: choice_text(label),
        })
        .collect();
    if choices.iter().any(|choice| choice.ident.is_empty()) {
        return Err("choice without identifier".to_string());
    }
    if choices[0].ident == choices[1].ident {
        return Err(format!("both choices use identifier {}", choices[0].ident));
    }

    let references = answer_key_references(item);
    let mut references = references.into_iter();
    let (Some(correct), None) = (references.next(), references.next()) else {
        return Err("expected exactly one answer-key reference".to_string());
    };
    if !choices.iter().any(|choice| choice.ident == correct) {
        return Err(format!("answer key names unknown choice {correct}"));
    }

    let mut choices = choices.into_iter();
    match (choices.next(), choices.next()) {
        (Some(first), Some(second)) => Ok(Shape {
            first,
            second,
            correct,
        }),
        _ => Err("expected exactly two choices".to_string()),
    }
}

fn complement(word: &str) -> &'static str {
    if word == TRUE_WORD { FALSE_WORD } else { TRUE_WORD }
}

fn canonical_word(value: &str) -> Option<&'static str> {
    if value.eq_ignore_ascii_case(TRUE_WORD) {
        Some(TRUE_WORD)
    } else if value.eq_ignore_ascii_case(FALSE_WORD) {
        Some(FALSE_WORD)
    } else {
        None
    }
}

fn map_choices(shape: &Shape) -> Mapping {
    let (first, second) = (&shape.first, &shape.second);

    if first.ident == TRUE_WORD && second.ident == FALSE_WORD
        || first.ident == FALSE_WORD && second.ident == TRUE_WORD
    {
        let first_word = canonical_word(&first.ident).unwrap_or(TRUE_WORD);
        return Mapping::new(
            [
                (first.ident.clone(), first_word),
                (second.ident.clone(), complement(first_word)),
            ],
            MappingBasis::AlreadyCanonical,
            &shape.correct,
        );
    }

    if let Some(word) = canonical_word(&shape.correct) {
        let (correct, other) = if first.ident == shape.correct {
            (first, second)
        } else {
            (second, first)
        };
        return Mapping::new(
            [
                (correct.ident.clone(), word),
                (other.ident.clone(), complement(word)),
            ],
            MappingBasis::AnswerKey,
            &shape.correct,
        );
    }

    if let (Some(a), Some(b)) = (canonical_word(&first.text), canonical_word(&second.text)) {
        if a != b {
            return Mapping::new(
                [(first.ident.clone(), a), (second.ident.clone(), b)],
                MappingBasis::LiteralText,
                &shape.correct,
            );
        }
    }

    Mapping::new(
        [
            (first.ident.clone(), TRUE_WORD),
            (second.ident.clone(), FALSE_WORD),
        ],
        MappingBasis::Positional,
        &shape.correct,
    )
}

/// Renames both choices and retargets every answer-key reference. References
/// that name neither choice are pointed at the incorrect choice.
fn apply(item: &mut Element, mapping: &Mapping) -> bool {
    let mut changed = false;
    let incorrect = mapping.incorrect;

    item.walk_mut(&mut |el: &mut Element| {
        if el.local_name() != "response_label" {
            return;
        }
        let Some(old) = el.attr("ident").map(|ident| ident.trim().to_string()) else {
            return;
        };
        if let Some(new) = mapping.target_of(&old) {
            if el.attr("ident") != Some(new) {
                el.set_attr("ident", new);
                changed = true;
            }
        }
    });

    item.walk_mut(&mut |el: &mut Element| {
        if el.local_name() != "varequal" {
            return;
        }
        let current = el.text_content();
        let value = current.trim();
        let target = mapping
            .target_of(value)
            .or_else(|| canonical_word(value))
            .unwrap_or(incorrect);
        if current != target {
            el.set_text(target);
            changed = true;
        }
    });
    changed
}

/// Removes `<other/>` conditions; a scoring condition left with an empty
/// condition block is removed as a whole.
fn strip_other_branches(item: &mut Element) -> bool {
    let mut removed = 0;
    item.walk_mut(&mut |el: &mut Element| {
        if el.local_name() == "conditionvar" {
            removed += el.remove_descendants(&|child: &Element| child.local_name() == "other");
        }
    });
    if removed == 0 {
        return false;
    }
    item.walk_mut(&mut |el: &mut Element| {
        if el.local_name() == "resprocessing" {
            el.children.retain(|node| match node {
                Node::Element(condition) if condition.local_name() == "respcondition" => condition
                    .child("conditionvar")
                    .is_none_or(|var| var.elements().next().is_some()),
                _ => true,
            });
        }
    });
    true
}

/// Whether the normalizer would accept the item's shape as it stands.
pub(crate) fn has_normalizable_shape(item: &Element) -> bool {
    validate_shape(item).is_ok()
}

/// Checks a normalized item. `None` when the item is not a two-choice
/// candidate, otherwise the reason it is not in canonical form, if any.
pub fn check_item(item: &Element) -> Option<Result<(), String>> {
    if !is_candidate(item) {
        return None;
    }
    let labels = choice_labels(item);
    let idents: BTreeSet<&str> = labels.iter().filter_map(|label| label.attr("ident")).collect();
    if labels.len() != 2 || idents != BTreeSet::from([TRUE_WORD, FALSE_WORD]) {
        let found: Vec<&str> = labels.iter().map(|label| label.attr("ident").unwrap_or("")).collect();
        return Some(Err(format!("choice identifiers {found:?}, expected [\"true\", \"false\"]")));
    }
    for eq in item.find_all("varequal") {
        let value = eq.text_content();
        if value != TRUE_WORD && value != FALSE_WORD {
            return Some(Err(format!("answer-key reference {:?}", value.trim())));
        }
    }
    Some(Ok(()))
}
