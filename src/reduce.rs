use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

pub const DEFAULT_MAX_CHARS: usize = 9000;
pub const TRUNCATION_MARKER: &str = "\n\n[TRUNCADO]";

const HEAD_LINES: usize = 40;
const BODY_END_LINE: usize = 220;
const MAX_HINT_LINES: usize = 200;

/// Section keywords, in the language of the postings.
const SECTION_HINTS: &[&str] = &[
    "responsabilidades",
    "atribuições",
    "atividades",
    "requisitos",
    "qualificações",
    "desejável",
    "diferenciais",
    "benefícios",
    "beneficios",
    "descrição",
    "descricao",
    "sobre a vaga",
    "sobre nós",
    "sobre a empresa",
    "local",
    "localidade",
    "modelo",
    "remoto",
    "híbrido",
    "hibrido",
    "presencial",
    "salário",
    "salario",
];

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank-line regex"));

/// Light cleanup: collapse spaces and tabs, drop empty and tiny (<= 2 chars) lines.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let t = text.replace("\r\n", "\n");
    let t = HORIZONTAL_WS.replace_all(&t, " ");
    let t = BLANK_RUNS.replace_all(&t, "\n\n");

    t.split('\n')
        .map(str::trim)
        .filter(|line| line.chars().count() > 2)
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_section_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    SECTION_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Header lines, body lines and keyword-matched lines, deduplicated and
/// capped at `max_chars` (plus [`TRUNCATION_MARKER`] when cut).
pub fn reduce(text: &str, max_chars: usize) -> String {
    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = cleaned.split('\n').collect();

    let head = lines.iter().take(HEAD_LINES);
    let body = lines.iter().skip(HEAD_LINES).take(BODY_END_LINE - HEAD_LINES);
    let hinted = lines
        .iter()
        .filter(|line| is_section_line(line))
        .take(MAX_HINT_LINES);

    let separator = [""];
    let combined = head
        .chain(separator.iter())
        .chain(body)
        .chain(separator.iter())
        .chain(hinted);

    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<&str> = Vec::new();
    for line in combined {
        let key = line.trim().to_lowercase();
        if key.is_empty() {
            if out.last().is_some_and(|last| !last.is_empty()) {
                out.push("");
            }
            continue;
        }
        if seen.insert(key) {
            out.push(*line);
        }
    }

    let joined = out.join("\n");
    let reduced = joined.trim();

    if reduced.chars().count() > max_chars {
        let mut cut = cut_at_line(reduced, max_chars).to_string();
        cut.push_str(TRUNCATION_MARKER);
        return cut;
    }

    reduced.to_string()
}

/// First `max_chars` chars, backed up to the last whole line when the limit
/// falls inside one. A single oversized line is cut mid-line.
fn cut_at_line(text: &str, max_chars: usize) -> &str {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(i, _)| i);
    let head = &text[..end];
    if text[end..].starts_with('\n') {
        return head;
    }
    match head.rfind('\n') {
        Some(i) => head[..i].trim_end(),
        None => head,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (0..n).map(|i| format!("linha de conteúdo {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_clean_text_collapses_whitespace_and_drops_tiny_lines() {
        let text = "Título\t\t da   vaga\r\n\r\n\r\n\r\nok\n  \nRequisitos:   Rust  \n";
        assert_eq!(clean_text(text), "Título da vaga\nRequisitos: Rust");
    }

    #[test]
    fn test_reduce_short_text_passes_through() {
        let text = "Engenheiro de Software\nRequisitos: Rust\nLocal: São Paulo";
        assert_eq!(reduce(text, DEFAULT_MAX_CHARS), text);
    }

    #[test]
    fn test_reduce_is_deterministic() {
        let text = format!("{}\nSalário: a combinar\nModelo: remoto", numbered_lines(500));
        assert_eq!(reduce(&text, 3000), reduce(&text, 3000));
    }

    #[test]
    fn test_reduce_keeps_keyword_lines_beyond_body_window() {
        let text = format!("{}\nSalário: R$ 10.000\nBenefícios: VR", numbered_lines(400));
        let reduced = reduce(&text, 100_000);
        assert!(reduced.contains("linha de conteúdo 0"));
        assert!(reduced.contains("linha de conteúdo 219"));
        assert!(!reduced.contains("linha de conteúdo 220"));
        assert!(reduced.contains("Salário: R$ 10.000"));
        assert!(reduced.contains("Benefícios: VR"));
    }

    #[test]
    fn test_reduce_deduplicates_case_insensitively() {
        let text = "Requisitos: Rust\nrequisitos: rust\nREQUISITOS: RUST\nLocal: remoto";
        let reduced = reduce(text, DEFAULT_MAX_CHARS);
        assert_eq!(reduced.matches("Requisitos").count(), 1);

        let keys: Vec<String> = reduced
            .lines()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        let unique: HashSet<&String> = keys.iter().collect();
        assert_eq!(keys.len(), unique.len());
    }

    #[test]
    fn test_reduce_collapses_separators() {
        // Every body/hint line duplicates a header line, so both separators
        // would be adjacent without collapsing.
        let text = "Requisitos: Rust\nLocal: remoto";
        let reduced = reduce(text, DEFAULT_MAX_CHARS);
        assert!(!reduced.contains("\n\n\n"));
    }

    #[test]
    fn test_reduce_truncates_with_marker() {
        let text = numbered_lines(300);
        let reduced = reduce(&text, 500);
        assert!(reduced.ends_with(TRUNCATION_MARKER));
        assert!(reduced.chars().count() <= 500 + TRUNCATION_MARKER.chars().count());
    }

    #[test]
    fn test_reduce_truncation_respects_char_boundaries() {
        let text = "ção".repeat(400);
        let reduced = reduce(&text, 10);
        assert!(reduced.starts_with("çãoçãoçãoç"));
    }

    #[test]
    fn test_reduce_truncation_never_repeats_a_line() {
        let reduced = reduce("linha alpha\nlinha alpha beta", 23);
        assert_eq!(reduced, format!("linha alpha{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_reduce_truncation_keeps_line_ending_at_limit() {
        let reduced = reduce("linha alpha\nlinha beta\nlinha gama", 22);
        assert_eq!(reduced, format!("linha alpha\nlinha beta{TRUNCATION_MARKER}"));
    }

    #[test]
    fn test_reduce_empty_input() {
        assert_eq!(reduce("", 100), "");
        assert_eq!(reduce("a\nbb\n  \n", 100), "");
    }
}
