use convert_case::{Boundary, Case, Casing};

use crate::kubevirt::ObjectIdentity;

/// Formats a camelCase name as snake_case, keeping acronyms together (`guestOSInfo` becomes
/// `guest_os_info`).
pub fn format_var_name(name: &str) -> String {
    name.with_boundaries(&[Boundary::LowerUpper, Boundary::Acronym])
        .to_case(Case::Snake)
}

/// Strips the URL scheme from an API server address and replaces characters that are awkward in
/// group names.
pub fn default_host_name(host: &str) -> String {
    host.replace("https://", "")
        .replace("http://", "")
        .replace('.', "-")
        .replace(':', "_")
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Name,
    Namespace,
    Uid,
}

/// A host name template with `{name}`, `{namespace}` and `{uid}` placeholders. Literal braces are
/// written as `{{` and `}}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostFormat {
    segments: Vec<Segment>,
}

impl HostFormat {
    pub const DEFAULT: &'static str = "{namespace}-{name}";

    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut field = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => field.push(c),
                            None => {
                                return Err(format!(
                                    "Invalid host_format {template:?}: unclosed placeholder"
                                ));
                            }
                        }
                    }

                    let segment = match field.as_str() {
                        "name" => Segment::Name,
                        "namespace" => Segment::Namespace,
                        "uid" => Segment::Uid,
                        other => {
                            return Err(format!(
                                "Invalid host_format {template:?}: unknown placeholder {{{other}}}, expected one of {{name}}, {{namespace}} or {{uid}}"
                            ));
                        }
                    };

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => {
                    return Err(format!(
                        "Invalid host_format {template:?}: single '}}' encountered"
                    ));
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    pub fn render(&self, identity: &ObjectIdentity) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Name => identity.name.as_str(),
                Segment::Namespace => identity.namespace.as_str(),
                Segment::Uid => identity.uid.as_str(),
            })
            .collect()
    }

}

impl Default for HostFormat {
    fn default() -> Self {
        Self {
            segments: vec![
                Segment::Namespace,
                Segment::Literal("-".into()),
                Segment::Name,
            ],
        }
    }
}
