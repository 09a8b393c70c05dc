/// Parser for the LCOV `.info` format.
///
/// Reference: https://ltp.sourceforge.net/coverage/lcov/geninfo.1.php
///
/// Key records:
///   TN:<test name>
///   SF:<absolute path to source file>
///   FN:<line>[,<end line>],<function name>
///   FNDA:<execution count>,<function name>
///   FNL:<index>,<line>[,<end line>]          (LCOV 2.x)
///   FNA:<index>,<execution count>,<name>     (LCOV 2.x)
///   FNF:<number of functions found>
///   FNH:<number of functions hit>
///   DA:<line number>,<execution count>[,<checksum>]
///   BRDA:<line>,<block>,<branch>,<taken>   ("-" means 0)
///   BRF:<branches found>
///   BRH:<branches hit>
///   LF:<lines found>
///   LH:<lines hit>
///   end_of_record
use std::collections::HashMap;
use std::io::BufRead;

use tracing::debug;

use super::Parser;
use crate::error::{CovlensError, Result};
use crate::model::*;

/// LCOV format parser.
pub struct LcovParser;

impl Parser for LcovParser {
    fn parse(&self, input: &[u8]) -> Result<Vec<Section>> {
        parse(input)
    }
}

/// Parse LCOV format coverage data from raw bytes.
pub fn parse(input: &[u8]) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    parse_streaming(&mut &*input, &mut |section| {
        sections.push(section);
        Ok(())
    })?;
    Ok(sections)
}

/// Section under construction. Summary records are optional in LCOV, so
/// they are kept aside and only fall back to derived values at the end.
struct Pending {
    section: Section,
    fn_by_name: HashMap<String, usize>,
    fn_lines: HashMap<String, u32>,
    lf: Option<u64>,
    lh: Option<u64>,
    brf: Option<u64>,
    brh: Option<u64>,
    fnf: Option<u64>,
    fnh: Option<u64>,
}

impl Pending {
    fn new(path: &str) -> Self {
        Self {
            section: Section::new(path.to_string()),
            fn_by_name: HashMap::new(),
            fn_lines: HashMap::new(),
            lf: None,
            lh: None,
            brf: None,
            brh: None,
            fnf: None,
            fnh: None,
        }
    }

    fn push_function(&mut self, name: &str, line_number: u32, hit_count: u64) {
        let functions = &mut self.section.functions.details;
        self.fn_by_name.insert(name.to_string(), functions.len());
        functions.push(FunctionDetail {
            name: name.to_string(),
            line_number,
            hit_count,
        });
    }

    fn finish(self) -> Section {
        let mut section = self.section;

        let lines = &section.lines.details;
        section.lines.instrumented = self.lf.unwrap_or(lines.len() as u64);
        section.lines.hit = self
            .lh
            .unwrap_or_else(|| lines.iter().filter(|l| l.hit_count > 0).count() as u64);

        let branches = &section.branches.details;
        section.branches.instrumented = self.brf.unwrap_or(branches.len() as u64);
        section.branches.hit = self
            .brh
            .unwrap_or_else(|| branches.iter().filter(|b| b.hit_count > 0).count() as u64);

        let functions = &section.functions.details;
        section.functions.instrumented = self.fnf.unwrap_or(functions.len() as u64);
        section.functions.hit = self
            .fnh
            .unwrap_or_else(|| functions.iter().filter(|f| f.hit_count > 0).count() as u64);

        section
    }
}

/// Streaming LCOV parser — calls `emit` once per `end_of_record`.
/// Reads line-by-line from a buffered reader so the full input need
/// not be in memory at once.
pub fn parse_streaming(
    reader: &mut dyn BufRead,
    emit: &mut dyn FnMut(Section) -> Result<()>,
) -> Result<()> {
    let mut current: Option<Pending> = None;
    let mut raw_line = String::new();
    let mut lineno = 0usize;

    loop {
        raw_line.clear();
        lineno += 1;
        let n = reader
            .read_line(&mut raw_line)
            .map_err(|e| CovlensError::parse(lineno, format!("unreadable input: {e}")))?;
        if n == 0 {
            break; // EOF
        }

        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "end_of_record" {
            if let Some(pending) = current.take() {
                emit(pending.finish())?;
            }
            continue;
        }

        let Some((tag, value)) = line.split_once(':') else {
            return Err(CovlensError::parse(lineno, format!("not an LCOV record: '{line}'")));
        };

        match tag {
            "TN" | "VER" => {}
            "SF" => {
                // A new SF without end_of_record closes the previous section.
                if let Some(pending) = current.replace(Pending::new(value)) {
                    emit(pending.finish())?;
                }
            }
            "DA" | "BRDA" | "FN" | "FNDA" | "FNL" | "FNA" | "LF" | "LH" | "BRF" | "BRH"
            | "FNF" | "FNH" => {
                let Some(pending) = current.as_mut() else {
                    return Err(CovlensError::parse(
                        lineno,
                        format!("{tag} record outside of an SF section"),
                    ));
                };
                parse_record(pending, tag, value, lineno)?;
            }
            // Extension records we do not model.
            _ => {}
        }
    }

    // Handle case where file ends without end_of_record
    if let Some(pending) = current.take() {
        emit(pending.finish())?;
    }

    Ok(())
}

fn parse_record(pending: &mut Pending, tag: &str, value: &str, lineno: usize) -> Result<()> {
    match tag {
        "DA" => {
            // DA:<line_number>,<execution_count>[,<checksum>]
            // Some instrumenters use negative counts (e.g., -1) to indicate
            // non-instrumentable lines. We skip those entirely.
            let mut parts = value.splitn(3, ',');
            let line_number = line_number(parts.next(), lineno)?;
            let raw_count = parts
                .next()
                .ok_or_else(|| CovlensError::parse(lineno, "DA record without a count"))?;
            if let Some(negative) = raw_count.strip_prefix('-') {
                number::<u64>(Some(negative), lineno, "DA count")?;
                return Ok(());
            }
            let hit_count = number(Some(raw_count), lineno, "DA count")?;
            pending.section.lines.details.push(LineDetail {
                line_number,
                hit_count,
            });
        }
        "BRDA" => {
            // BRDA:<line>,<block>,<branch>,<taken>
            let malformed = || CovlensError::parse(lineno, format!("malformed BRDA record '{value}'"));
            let (head, taken) = value.rsplit_once(',').ok_or_else(malformed)?;
            let (line_str, rest) = head.split_once(',').ok_or_else(malformed)?;
            let (block, branch) = rest.split_once(',').ok_or_else(malformed)?;
            let line_number = line_number(Some(line_str), lineno)?;
            let hit_count = if taken == "-" {
                0
            } else {
                number(Some(taken), lineno, "BRDA taken count")?
            };
            pending.section.branches.details.push(BranchDetail {
                line_number,
                block: block.to_string(),
                branch: branch.to_string(),
                hit_count,
            });
        }
        "FN" => {
            // FN:<line>[,<end_line>],<function_name>
            let (line_str, rest) = value
                .split_once(',')
                .ok_or_else(|| CovlensError::parse(lineno, format!("malformed FN record '{value}'")))?;
            let line_number = line_number(Some(line_str), lineno)?;
            let name = match rest.split_once(',') {
                Some((end, name)) if end.parse::<u32>().is_ok() => name,
                _ => rest,
            };
            pending.push_function(name, line_number, 0);
        }
        "FNDA" => {
            // FNDA:<execution_count>,<function_name>
            let (count_str, name) = value
                .split_once(',')
                .ok_or_else(|| CovlensError::parse(lineno, format!("malformed FNDA record '{value}'")))?;
            let hit_count: u64 = number(Some(count_str), lineno, "FNDA count")?;
            match pending.fn_by_name.get(name) {
                Some(&idx) => {
                    let function = &mut pending.section.functions.details[idx];
                    function.hit_count = function.hit_count.saturating_add(hit_count);
                }
                None => debug!(function = name, "FNDA for undeclared function, ignoring"),
            }
        }
        "FNL" => {
            // FNL:<index>,<line>[,<end_line>]
            let mut parts = value.splitn(3, ',');
            let index = parts
                .next()
                .ok_or_else(|| CovlensError::parse(lineno, "FNL record without an index"))?;
            let line_number = line_number(parts.next(), lineno)?;
            pending.fn_lines.insert(index.to_string(), line_number);
        }
        "FNA" => {
            // FNA:<index>,<execution_count>,<name>
            let mut parts = value.splitn(3, ',');
            let index = parts.next().unwrap_or_default();
            let hit_count = number(parts.next(), lineno, "FNA count")?;
            let name = parts
                .next()
                .ok_or_else(|| CovlensError::parse(lineno, "FNA record without a name"))?;
            let Some(&line_number) = pending.fn_lines.get(index) else {
                return Err(CovlensError::parse(
                    lineno,
                    format!("FNA refers to unknown FNL index '{index}'"),
                ));
            };
            pending.push_function(name, line_number, hit_count);
        }
        "LF" => pending.lf = Some(number(Some(value), lineno, "LF")?),
        "LH" => pending.lh = Some(number(Some(value), lineno, "LH")?),
        "BRF" => pending.brf = Some(number(Some(value), lineno, "BRF")?),
        "BRH" => pending.brh = Some(number(Some(value), lineno, "BRH")?),
        "FNF" => pending.fnf = Some(number(Some(value), lineno, "FNF")?),
        "FNH" => pending.fnh = Some(number(Some(value), lineno, "FNH")?),
        _ => {}
    }
    Ok(())
}

fn number<T: std::str::FromStr>(raw: Option<&str>, lineno: usize, what: &str) -> Result<T> {
    let raw = raw.ok_or_else(|| CovlensError::parse(lineno, format!("missing {what}")))?;
    raw.trim()
        .parse()
        .map_err(|_| CovlensError::parse(lineno, format!("invalid {what} '{raw}'")))
}

/// Source line numbers are 1-based; 0 cannot be re-based and is rejected.
fn line_number(raw: Option<&str>, lineno: usize) -> Result<u32> {
    match number::<u32>(raw, lineno, "line number")? {
        0 => Err(CovlensError::parse(lineno, "line number 0")),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"TN:test
SF:/src/lib.rs
FN:1,main
FN:4,helper
FNDA:5,main
FNDA:0,helper
FNF:2
FNH:1
DA:1,5
DA:2,5
DA:3,0
DA:4,0
DA:5,5
LF:5
LH:3
BRDA:2,0,0,5
BRDA:2,0,1,-
BRF:2
BRH:1
end_of_record
SF:/src/util.rs
DA:1,1
DA:2,0
end_of_record
";

    #[test]
    fn test_parse_lcov() {
        let sections = parse(SAMPLE).unwrap();

        assert_eq!(sections.len(), 2);

        let lib = &sections[0];
        assert_eq!(lib.path, "/src/lib.rs");
        assert_eq!(lib.lines.details.len(), 5);
        assert_eq!(lib.lines.details[0].line_number, 1);
        assert_eq!(lib.lines.details[0].hit_count, 5);
        assert_eq!(lib.lines.details[2].line_number, 3);
        assert_eq!(lib.lines.details[2].hit_count, 0);
        assert_eq!((lib.lines.instrumented, lib.lines.hit), (5, 3));

        assert_eq!(lib.branches.details.len(), 2);
        assert_eq!(lib.branches.details[0].line_number, 2);
        assert_eq!(lib.branches.details[0].block, "0");
        assert_eq!(lib.branches.details[0].branch, "0");
        assert_eq!(lib.branches.details[0].hit_count, 5);
        assert_eq!(lib.branches.details[1].branch, "1");
        assert_eq!(lib.branches.details[1].hit_count, 0);
        assert_eq!((lib.branches.instrumented, lib.branches.hit), (2, 1));

        assert_eq!(lib.functions.details.len(), 2);
        assert_eq!(lib.functions.details[0].name, "main");
        assert_eq!(lib.functions.details[0].hit_count, 5);
        assert_eq!(lib.functions.details[0].line_number, 1);
        assert_eq!(lib.functions.details[1].name, "helper");
        assert_eq!(lib.functions.details[1].hit_count, 0);
        assert_eq!((lib.functions.instrumented, lib.functions.hit), (2, 1));

        let util = &sections[1];
        assert_eq!(util.path, "/src/util.rs");
        assert_eq!(util.lines.details.len(), 2);
        assert_eq!(util.branches.details.len(), 0);
        assert_eq!(util.functions.details.len(), 0);
    }

    #[test]
    fn test_summary_records_are_taken_verbatim() {
        // LF/LH disagree with the details on purpose: the recorded totals win.
        let input = b"SF:/a.c\nDA:1,1\nLF:10\nLH:7\nend_of_record\n";
        let sections = parse(input).unwrap();
        assert_eq!(sections[0].lines.instrumented, 10);
        assert_eq!(sections[0].lines.hit, 7);
    }

    #[test]
    fn test_summary_derived_when_missing() {
        let input = b"SF:/a.c\nDA:1,1\nDA:2,0\nDA:3,4\nBRDA:1,0,0,0\nend_of_record\n";
        let sections = parse(input).unwrap();
        assert_eq!((sections[0].lines.instrumented, sections[0].lines.hit), (3, 2));
        assert_eq!((sections[0].branches.instrumented, sections[0].branches.hit), (1, 0));
        assert_eq!((sections[0].functions.instrumented, sections[0].functions.hit), (0, 0));
    }

    #[test]
    fn test_parse_lcov_no_end_of_record() {
        let input = b"SF:/src/lib.rs\nDA:1,1\nDA:2,0\n";
        let sections = parse(input).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].lines.details.len(), 2);
    }

    #[test]
    fn test_sf_closes_unterminated_section() {
        let input = b"SF:/a.c\nDA:1,1\nSF:/b.c\nDA:2,2\nend_of_record\n";
        let sections = parse(input).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].path, "/a.c");
        assert_eq!(sections[1].path, "/b.c");
    }

    #[test]
    fn test_parse_lcov_negative_counts() {
        // DA lines with negative counts (e.g., -1) should be skipped as
        // non-instrumentable.
        let input = b"SF:/src/lib.rs\nDA:1,5\nDA:2,-1\nDA:3,0\nDA:4,3\nend_of_record\n";
        let sections = parse(input).unwrap();

        assert_eq!(sections.len(), 1);
        let lines = &sections[0].lines.details;
        // Line 2 has count=-1, should be skipped. Lines 1, 3, 4 remain.
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].line_number, 1);
        assert_eq!(lines[0].hit_count, 5);
        assert_eq!(lines[1].line_number, 3);
        assert_eq!(lines[1].hit_count, 0);
        assert_eq!(lines[2].line_number, 4);
        assert_eq!(lines[2].hit_count, 3);
    }

    #[test]
    fn test_parse_lcov_empty() {
        // An LCOV file with only a test name and no records should produce
        // no sections.
        let sections = parse(b"TN:test\n").unwrap();
        assert!(sections.is_empty());
    }

    #[test]
    fn test_fn_with_end_line_and_fnda_sums() {
        let input = b"SF:/a.cpp\nFN:3,9,_Z3fooi\nFNDA:1,_Z3fooi\nFNDA:2,_Z3fooi\nFNDA:4,missing\nend_of_record\n";
        let sections = parse(input).unwrap();
        let functions = &sections[0].functions.details;
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].name, "_Z3fooi");
        assert_eq!(functions[0].line_number, 3);
        assert_eq!(functions[0].hit_count, 3);
    }

    #[test]
    fn test_fnl_fna_records() {
        let input = b"SF:/a.c\nFNL:0,12,20\nFNA:0,7,alpha\nFNL:1,30\nFNA:1,0,beta\nend_of_record\n";
        let sections = parse(input).unwrap();
        let functions = &sections[0].functions.details;
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].name, "alpha");
        assert_eq!(functions[0].line_number, 12);
        assert_eq!(functions[0].hit_count, 7);
        assert_eq!(functions[1].name, "beta");
        assert_eq!(functions[1].line_number, 30);
        assert_eq!(sections[0].functions.hit, 1);
    }

    #[test]
    fn test_branch_identifier_may_contain_commas() {
        let input = b"SF:/a.c\nBRDA:4,e0,a, b,2\nend_of_record\n";
        let sections = parse(input).unwrap();
        let branch = &sections[0].branches.details[0];
        assert_eq!(branch.block, "e0");
        assert_eq!(branch.branch, "a, b");
        assert_eq!(branch.hit_count, 2);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = parse(b"hello world this is not coverage data").unwrap_err();
        assert!(matches!(err, CovlensError::Parse { line: 1, .. }), "{err}");
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let err = parse(b"SF:/a.c\nDA:1,\xff\xfe\n").unwrap_err();
        assert!(matches!(err, CovlensError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn test_malformed_numbers_are_errors() {
        assert!(parse(b"SF:/a.c\nDA:x,1\n").is_err());
        assert!(parse(b"SF:/a.c\nDA:0,1\n").is_err());
        assert!(parse(b"SF:/a.c\nBRDA:1,0,0,many\n").is_err());
        assert!(parse(b"SF:/a.c\nLF:lots\n").is_err());
        assert!(parse(b"SF:/a.c\nFNA:3,1,orphan\n").is_err());
    }

    #[test]
    fn test_record_outside_section_is_an_error() {
        let err = parse(b"DA:1,1\n").unwrap_err();
        assert!(err.to_string().contains("outside of an SF section"), "{err}");
    }
}
