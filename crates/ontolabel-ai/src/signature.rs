//! Task signatures: instructions, field prefixes and the few-shot prompt
//! format shared by every stage.
//!
//! Prompts use a chain-of-thought layout. The model is asked to continue a
//! `Reasoning:` line and then emit the output field; [`Signature::parse`]
//! splits the two apart again.

use ontolabel_core::{ConfigError, Demonstration, Fields};

pub const REASONING_PREFIX: &str = "Reasoning: Let's think step by step in order to";
const REASONING_FORMAT: &str = "${produce the output}. We ...";
const HINT_PREFIX: &str = "Hint:";
const SEPARATOR: &str = "\n---\n\n";

#[derive(Debug)]
pub struct FieldSpec {
    pub name: &'static str,
    pub prefix: &'static str,
    pub desc: Option<&'static str>,
}

#[derive(Debug)]
pub struct Signature {
    pub name: &'static str,
    pub instructions: &'static str,
    pub inputs: &'static [FieldSpec],
    pub output: FieldSpec,
    hint: Option<fn(&[String]) -> String>,
}

/// One sampled completion split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCompletion {
    pub rationale: Option<String>,
    pub output: String,
}

const ESCO_TEXT: FieldSpec = FieldSpec {
    name: "text",
    prefix: "Vacancy:",
    desc: None,
};

const BIODEX_TEXT: FieldSpec = FieldSpec {
    name: "text",
    prefix: "Article:",
    desc: None,
};

const OPTIONS: FieldSpec = FieldSpec {
    name: "options",
    prefix: "Options:",
    desc: Some("List of comma-separated options to choose from"),
};

const ESCO_OUTPUT: FieldSpec = FieldSpec {
    name: "output",
    prefix: "Skills:",
    desc: Some("list of comma-separated ESCO skills"),
};

const BIODEX_OUTPUT: FieldSpec = FieldSpec {
    name: "output",
    prefix: "Reactions:",
    desc: Some("list of comma-separated adverse drug reactions"),
};

fn esco_hint(labels: &[String]) -> String {
    format!(
        "Produce the reasoning to find the correct skills. Return all applicable skill queries. \
         The correct skills should include: {}. Add any other skills you think are relevant.",
        labels.join(", ")
    )
}

pub static INFER_ESCO: Signature = Signature {
    name: "infer_esco",
    instructions: "Given a snippet from a job vacancy, identify all the ESCO job skills mentioned. \
                   Always return skills.",
    inputs: &[ESCO_TEXT],
    output: ESCO_OUTPUT,
    hint: Some(esco_hint),
};

pub static RANK_ESCO: Signature = Signature {
    name: "rank_esco",
    instructions: "Given a snippet from a job vacancy, pick the 10 most applicable skills from the \
                   options that are directly expressed in the snippet.",
    inputs: &[ESCO_TEXT, OPTIONS],
    output: ESCO_OUTPUT,
    hint: None,
};

pub static INFER_BIODEX: Signature = Signature {
    name: "infer_biodex",
    instructions: "Given a snippet from a medical article, identify the adverse drug reactions \
                   affecting the patient. Always return reactions.",
    inputs: &[BIODEX_TEXT],
    output: BIODEX_OUTPUT,
    hint: None,
};

pub static RANK_BIODEX: Signature = Signature {
    name: "rank_biodex",
    instructions: "Given a snippet from a medical article, pick the 10 most applicable adverse \
                   reactions from the options that are directly expressed in the snippet.",
    inputs: &[BIODEX_TEXT, OPTIONS],
    output: BIODEX_OUTPUT,
    hint: None,
};

static SIGNATURES: [&Signature; 4] = [&INFER_ESCO, &RANK_ESCO, &INFER_BIODEX, &RANK_BIODEX];

/// Find a signature by name.
pub fn lookup(name: &str) -> Result<&'static Signature, ConfigError> {
    SIGNATURES
        .iter()
        .copied()
        .find(|s| s.name == name)
        .ok_or_else(|| ConfigError::UnknownSignature(name.to_string()))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    SIGNATURES.iter().map(|s| s.name)
}

impl Signature {
    /// The hint shown to a hinted teacher, if this signature defines one.
    pub fn hint(&self, labels: &[String]) -> Option<String> {
        self.hint.map(|render| render(labels))
    }

    /// Render the full prompt: instructions, format, demonstrations, then the
    /// live inputs ending in an open `Reasoning:` line.
    pub fn render(&self, demos: &[Demonstration], inputs: &Fields, hint: Option<&str>) -> String {
        let mut prompt = String::new();
        prompt.push_str(self.instructions);
        prompt.push_str("\n\n---\n\nFollow the following format.\n\n");
        for field in self.inputs {
            match field.desc {
                Some(desc) => push_line(&mut prompt, field.prefix, desc),
                None => push_line(&mut prompt, field.prefix, &format!("${{{}}}", field.name)),
            }
        }
        if hint.is_some() {
            push_line(&mut prompt, HINT_PREFIX, "${hint}");
        }
        push_line(&mut prompt, REASONING_PREFIX, REASONING_FORMAT);
        push_line(&mut prompt, self.output.prefix, self.output.desc.unwrap_or("${output}"));

        for demo in demos {
            prompt.push_str(SEPARATOR);
            for field in self.inputs {
                if let Some(value) = demo.inputs.get(field.name) {
                    push_line(&mut prompt, field.prefix, value);
                }
            }
            if let Some(rationale) = &demo.rationale {
                push_line(&mut prompt, REASONING_PREFIX, rationale);
            }
            if let Some(output) = demo.outputs.get(self.output.name) {
                push_line(&mut prompt, self.output.prefix, output);
            }
        }

        prompt.push_str(SEPARATOR);
        for field in self.inputs {
            let value = inputs.get(field.name).map(String::as_str).unwrap_or_default();
            push_line(&mut prompt, field.prefix, value);
        }
        if let Some(hint) = hint {
            push_line(&mut prompt, HINT_PREFIX, hint);
        }
        prompt.push_str(REASONING_PREFIX);
        prompt
    }

    /// Split a completion into rationale and output. Never fails.
    ///
    /// The output runs from the output prefix to the next blank line. Without
    /// an output prefix the whole completion is taken as the output.
    pub fn parse(&self, completion: &str) -> ParsedCompletion {
        let text = completion.trim_start();
        let text = text.strip_prefix(REASONING_PREFIX).unwrap_or(text);

        let Some(at) = text.find(self.output.prefix) else {
            return ParsedCompletion {
                rationale: None,
                output: text.trim().to_string(),
            };
        };

        let rationale = text[..at].trim();
        let rest = &text[at + self.output.prefix.len()..];
        let output = rest.split("\n\n").next().unwrap_or_default().trim();
        ParsedCompletion {
            rationale: (!rationale.is_empty()).then(|| rationale.to_string()),
            output: output.to_string(),
        }
    }
}

fn push_line(prompt: &mut String, prefix: &str, value: &str) {
    prompt.push_str(prefix);
    if !value.is_empty() {
        prompt.push(' ');
        prompt.push_str(value);
    }
    prompt.push('\n');
}
