//! hOCR parsing
//!
//! Pulls line text, word confidences and the first word's box out of
//! Tesseract's hOCR output. Only the handful of attributes Tesseract emits are
//! understood; this is not an HTML parser.

use regex::Regex;
use std::sync::LazyLock;

use crate::geometry::Rectangle;

static LINE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<span class=['"]ocr_(?:line|caption|textfloat|header)['"][^>]*>"#).expect("line pattern")
});

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<span class=['"]ocrx_word['"][^>]*?title=['"]([^'"]*)['"][^>]*>(.*?)</span>"#).expect("word pattern")
});

/// Title of the first word in a line: full geometry plus confidence
static FIRST_WORD_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bbox (\d+) (\d+) (\d+) (\d+); x_wconf (\d+)").expect("bbox pattern"));

/// Title of any later word: confidence only
static WORD_TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"x_wconf (\d+)").expect("wconf pattern"));

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));

/// Text recovered from one hOCR document
#[derive(Debug, Clone, PartialEq)]
pub struct HocrText {
    /// Lines joined with `\n`, words within a line joined with a space
    pub text: String,
    /// Rounded average word confidence
    pub score: i32,
    /// Box of the first recognized word
    pub first_word: Option<Rectangle>,
}

/// Parse an hOCR document. `None` when no line has permitted content.
pub fn parse_hocr(markup: &str) -> Option<HocrText> {
    let starts: Vec<usize> = LINE_START.find_iter(markup).map(|m| m.end()).collect();

    let mut lines = Vec::new();
    let mut confidences = Vec::new();
    let mut first_word = None;

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(markup.len());
        let mut words = Vec::new();

        for (n, caps) in WORD.captures_iter(&markup[start..end]).enumerate() {
            let title = &caps[1];
            let text = filter_permitted(&decode_entities(&TAG.replace_all(&caps[2], "")));
            if text.is_empty() {
                continue;
            }

            let conf = if n == 0 {
                match FIRST_WORD_TITLE.captures(title) {
                    Some(geometry) => {
                        if first_word.is_none() {
                            first_word = bbox_of(&geometry);
                        }
                        geometry[5].parse::<i32>().ok()
                    }
                    None => confidence(title),
                }
            } else {
                confidence(title)
            };

            if let Some(conf) = conf {
                confidences.push(conf);
            }
            words.push(text);
        }

        if !words.is_empty() {
            lines.push(words.join(" "));
        }
    }

    if lines.is_empty() {
        return None;
    }
    Some(HocrText {
        text: lines.join("\n"),
        score: average(&confidences),
        first_word,
    })
}

/// Keep permitted characters of each line and drop lines left empty
pub fn clean_plain_text(text: &str) -> Option<String> {
    let lines: Vec<String> = text
        .lines()
        .map(filter_permitted)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Japanese scripts, Latin letters and digits, and common punctuation
pub fn is_permitted(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{303F}'   // CJK punctuation
        | '\u{3040}'..='\u{309F}' // hiragana
        | '\u{30A0}'..='\u{30FF}' // katakana
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{FF00}'..='\u{FFEF}' // full-width forms
        | 'a'..='z'
        | 'A'..='Z'
        | '0'..='9'
        | ' '
        | '!' | '?' | '.' | ',' | ':' | ';' | '\'' | '"' | '(' | ')' | '-' | '~' | '…' | '‥'
    )
}

fn filter_permitted(text: &str) -> String {
    text.chars().filter(|c| is_permitted(*c)).collect::<String>().trim().to_string()
}

fn confidence(title: &str) -> Option<i32> {
    WORD_TITLE.captures(title).and_then(|c| c[1].parse().ok())
}

fn bbox_of(caps: &regex::Captures<'_>) -> Option<Rectangle> {
    let edge = |i: usize| caps[i].parse::<u32>().ok();
    let (x0, y0, x1, y1) = (edge(1)?, edge(2)?, edge(3)?, edge(4)?);
    // hOCR boxes are exclusive on the far edges
    Rectangle::from_edges(x0, y0, x1.saturating_sub(1).max(x0), y1.saturating_sub(1).max(y0))
}

fn average(values: &[i32]) -> i32 {
    if values.is_empty() {
        return 0;
    }
    let sum: i64 = values.iter().map(|v| *v as i64).sum();
    (sum as f64 / values.len() as f64).round() as i32
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
  <div class='ocr_page' id='page_1' title='image "stdin"; bbox 0 0 300 120; ppageno 0'>
   <div class='ocr_carea' id='block_1_1' title="bbox 10 10 290 110">
    <p class='ocr_par' id='par_1_1' lang='jpn'>
     <span class='ocr_line' id='line_1_1' title="bbox 12 14 280 40; baseline 0 -3; x_size 26">
      <span class='ocrx_word' id='word_1_1' title='bbox 12 14 60 40; x_wconf 91'>今日</span>
      <span class='ocrx_word' id='word_1_2' title='bbox 62 14 110 40; x_wconf 86'>は</span>
     </span>
     <span class='ocr_textfloat' id='line_1_2' title="bbox 12 60 280 90">
      <span class='ocrx_word' id='word_1_3' title='bbox 12 60 90 90; x_wconf 77'><strong>晴れ</strong></span>
      <span class='ocrx_word' id='word_1_4' title='bbox 92 60 99 90; x_wconf 12'>§</span>
     </span>
    </p>
   </div>
  </div>"#;

    #[test]
    fn test_parse_lines_and_score() {
        let parsed = parse_hocr(SAMPLE).unwrap();
        assert_eq!(parsed.text, "今日 は\n晴れ");
        // 91, 86, 77 (the filtered-out word does not count)
        assert_eq!(parsed.score, 85);
        assert_eq!(parsed.first_word, Rectangle::from_edges(12, 14, 59, 39));
    }

    #[test]
    fn test_line_with_only_foreign_characters_dropped() {
        let markup = r#"<span class='ocr_line' title="bbox 0 0 10 10">
            <span class='ocrx_word' title='bbox 0 0 10 10; x_wconf 50'>§¶</span></span>"#;
        assert_eq!(parse_hocr(markup), None);
        assert_eq!(parse_hocr("<html></html>"), None);
    }

    #[test]
    fn test_entities_decoded() {
        let markup = r#"<span class='ocr_line' title="bbox 0 0 10 10">
            <span class='ocrx_word' title='bbox 0 0 10 10; x_wconf 70'>&quot;A&amp;B&quot;</span></span>"#;
        let parsed = parse_hocr(markup).unwrap();
        assert_eq!(parsed.text, "\"AB\"");
        assert_eq!(parsed.score, 70);
    }

    #[test]
    fn test_first_word_without_bbox_still_scored() {
        let markup = r#"<span class='ocr_line' title="bbox 0 0 10 10">
            <span class='ocrx_word' title='x_wconf 40'>あ</span>
            <span class='ocrx_word' title='bbox 5 5 9 9; x_wconf 61'>い</span></span>"#;
        let parsed = parse_hocr(markup).unwrap();
        assert_eq!(parsed.score, 51);
        assert_eq!(parsed.first_word, None);
    }

    #[test]
    fn test_clean_plain_text() {
        assert_eq!(clean_plain_text("  こんにちは \n§§\n世界"), Some("こんにちは\n世界".to_string()));
        assert_eq!(clean_plain_text("\n \n"), None);
    }
}
