use crate::error::{Error, Result};

/// Byte offset and size of one field within a kprobe event record, as
/// declared in its `format` file.
#[derive(Clone, Copy, Debug)]
pub struct Field {
    pub offset: usize,
    pub size: usize,
}

/// The pieces of a `events/kprobes/<name>/format` file this crate
/// needs: the numeric event id used to tag records in the raw ring
/// buffer, and the two fields every ftrace event format file starts
/// with (`common_type`, `common_pid`) regardless of probe.
#[derive(Clone, Copy, Debug)]
pub struct EventFormat {
    pub id: u64,
    pub common_type: Field,
    pub common_pid: Field,
}

struct ParsedField {
    name: String,
    field: Field,
}

fn parse_field_line(rest: &str) -> Option<ParsedField> {
    let mut decl = None;
    let mut offset = None;
    let mut size = None;
    for part in rest.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(v) = part.strip_prefix("offset:") {
            offset = v.trim().parse::<usize>().ok();
        } else if let Some(v) = part.strip_prefix("size:") {
            size = v.trim().parse::<usize>().ok();
        } else if decl.is_none() {
            decl = Some(part);
        }
    }
    let decl = decl?;
    // The declaration is a C-ish variable declaration; the field name
    // is the last identifier token, stripped of any array suffix.
    let name = decl
        .trim_end_matches(|c: char| c == ']' || c.is_ascii_digit() || c == '[')
        .split(|c: char| c.is_whitespace() || c == '*')
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();
    Some(ParsedField {
        name,
        field: Field {
            offset: offset?,
            size: size?,
        },
    })
}

/// Parses the contents of an `events/kprobes/<name>/format` file.
pub fn parse(text: &str) -> Result<EventFormat> {
    let mut id = None;
    let mut common_type = None;
    let mut common_pid = None;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("ID:") {
            id = rest.trim().parse::<u64>().ok();
            continue;
        }
        if let Some(rest) = line.strip_prefix("field:") {
            if let Some(parsed) = parse_field_line(rest) {
                match parsed.name.as_str() {
                    "common_type" => common_type = Some(parsed.field),
                    "common_pid" => common_pid = Some(parsed.field),
                    _ => {}
                }
            }
        }
    }

    Ok(EventFormat {
        id: id.ok_or_else(|| Error::trace("format file missing \"ID:\" line"))?,
        common_type: common_type
            .ok_or_else(|| Error::trace("format file missing \"common_type\" field"))?,
        common_pid: common_pid
            .ok_or_else(|| Error::trace("format file missing \"common_pid\" field"))?,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "name: k_race_0\n\
ID: 1234\n\
format:\n\
\tfield:unsigned short common_type;\toffset:0;\tsize:2;\tsigned:0;\n\
\tfield:unsigned char common_flags;\toffset:2;\tsize:1;\tsigned:0;\n\
\tfield:unsigned char common_preempt_count;\toffset:3;\tsize:1;\tsigned:0;\n\
\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;\n\
\n\
\tfield:unsigned long __probe_ip;\toffset:8;\tsize:8;\tsigned:0;\n\
\n\
print fmt: \"(%lx)\", REC->__probe_ip\n";

    #[test]
    fn parses_id_and_common_fields() {
        let fmt = parse(SAMPLE).unwrap();
        assert_eq!(fmt.id, 1234);
        assert_eq!(fmt.common_type.offset, 0);
        assert_eq!(fmt.common_type.size, 2);
        assert_eq!(fmt.common_pid.offset, 4);
        assert_eq!(fmt.common_pid.size, 4);
    }

    #[test]
    fn missing_id_is_an_error() {
        assert!(parse("format:\n\tfield:int common_pid;\toffset:4;\tsize:4;\tsigned:1;\n").is_err());
    }
}
