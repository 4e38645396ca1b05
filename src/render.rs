//! Escape-sequence renderer: terminal text with ANSI codes to HTML markup.
//!
//! Rendering is total. Recognised SGR codes become styled `<span>` runs,
//! other well-formed control sequences are consumed, and anything malformed
//! is passed through as literal text.

use serde::{Deserialize, Serialize};

/// Standard and bright colours (indices 0-15).
pub const BASE_COLORS: [&str; 16] = [
    "#000000", "#ff0000", "#00ff00", "#ffff00", "#0000ff", "#ff00ff", "#00ffff", "#ffffff",
    "#808080", "#ff0000", "#55ff55", "#ffff55", "#5555ff", "#ff55ff", "#55ffff", "#ffffff",
];

const CUBE_LEVELS: [u8; 6] = [0, 95, 135, 175, 215, 255];

/// Default foreground/background pair used for reverse video and the
/// document wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Palette {
    pub foreground: String,
    pub background: String,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            foreground: "#10b981".to_string(),
            background: "#000000".to_string(),
        }
    }
}

/// `#rgb` or `#rrggbb`, the only forms accepted for palette entries
pub fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(hex) => matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

impl Palette {
    /// Name of the first entry that is not a hex colour
    pub fn invalid_entry(&self) -> Option<(&'static str, &str)> {
        [("foreground", &self.foreground), ("background", &self.background)]
            .into_iter()
            .find(|(_, value)| !is_hex_color(value))
            .map(|(name, value)| (name, value.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Indexed(u8),
    Rgb(u8, u8, u8),
}

impl Color {
    fn css(self) -> String {
        match self {
            Color::Indexed(i) if i < 16 => BASE_COLORS[i as usize].to_string(),
            Color::Indexed(i) if i < 232 => {
                let i = i - 16;
                let r = CUBE_LEVELS[(i / 36) as usize];
                let g = CUBE_LEVELS[((i / 6) % 6) as usize];
                let b = CUBE_LEVELS[(i % 6) as usize];
                format!("#{:02x}{:02x}{:02x}", r, g, b)
            }
            Color::Indexed(i) => {
                let level = 8 + (i - 232) * 10;
                format!("#{:02x}{:02x}{:02x}", level, level, level)
            }
            Color::Rgb(r, g, b) => format!("#{:02x}{:02x}{:02x}", r, g, b),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SgrState {
    fg: Option<Color>,
    bg: Option<Color>,
    bold: bool,
    faint: bool,
    italic: bool,
    underline: bool,
    strike: bool,
    reverse: bool,
}

impl SgrState {
    fn is_plain(&self) -> bool {
        *self == SgrState::default()
    }

    fn css(&self, palette: &Palette) -> String {
        let (fg, bg) = if self.reverse {
            (
                Some(self.bg.map(Color::css).unwrap_or_else(|| palette.background.clone())),
                Some(self.fg.map(Color::css).unwrap_or_else(|| palette.foreground.clone())),
            )
        } else {
            (self.fg.map(Color::css), self.bg.map(Color::css))
        };

        let mut parts = Vec::new();
        if let Some(fg) = fg {
            parts.push(format!("color:{}", fg));
        }
        if let Some(bg) = bg {
            parts.push(format!("background-color:{}", bg));
        }
        if self.bold {
            parts.push("font-weight:bold".to_string());
        }
        if self.faint {
            parts.push("opacity:0.5".to_string());
        }
        if self.italic {
            parts.push("font-style:italic".to_string());
        }
        match (self.underline, self.strike) {
            (true, true) => parts.push("text-decoration:underline line-through".to_string()),
            (true, false) => parts.push("text-decoration:underline".to_string()),
            (false, true) => parts.push("text-decoration:line-through".to_string()),
            (false, false) => {}
        }
        parts.join(";")
    }

    fn apply(&mut self, params: &str) {
        let codes: Vec<Option<u16>> = params
            .split([';', ':'])
            .map(|p| if p.is_empty() { Some(0) } else { p.parse().ok() })
            .collect();

        let mut i = 0;
        while i < codes.len() {
            let Some(code) = codes[i] else {
                i += 1;
                continue;
            };
            match code {
                0 => *self = SgrState::default(),
                1 => self.bold = true,
                2 => self.faint = true,
                3 => self.italic = true,
                4 => self.underline = true,
                7 => self.reverse = true,
                9 => self.strike = true,
                22 => {
                    self.bold = false;
                    self.faint = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                27 => self.reverse = false,
                29 => self.strike = false,
                30..=37 => self.fg = Some(Color::Indexed((code - 30) as u8)),
                39 => self.fg = None,
                40..=47 => self.bg = Some(Color::Indexed((code - 40) as u8)),
                49 => self.bg = None,
                90..=97 => self.fg = Some(Color::Indexed((code - 90 + 8) as u8)),
                100..=107 => self.bg = Some(Color::Indexed((code - 100 + 8) as u8)),
                38 | 48 => {
                    let (color, consumed) = extended_color(&codes[i + 1..]);
                    if let Some(color) = color {
                        if code == 38 {
                            self.fg = Some(color);
                        } else {
                            self.bg = Some(color);
                        }
                    }
                    i += consumed;
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// Parse the tail of a `38`/`48` sequence. Returns the colour (if valid) and
/// how many parameters were consumed.
fn extended_color(rest: &[Option<u16>]) -> (Option<Color>, usize) {
    let byte = |v: Option<u16>| v.filter(|n| *n <= 255).map(|n| n as u8);
    match rest.first().copied().flatten() {
        Some(5) => match rest.get(1) {
            Some(n) => (byte(*n).map(Color::Indexed), 2),
            None => (None, rest.len()),
        },
        Some(2) if rest.len() >= 4 => {
            let rgb = (byte(rest[1]), byte(rest[2]), byte(rest[3]));
            match rgb {
                (Some(r), Some(g), Some(b)) => (Some(Color::Rgb(r, g, b)), 4),
                _ => (None, 4),
            }
        }
        _ => (None, rest.len()),
    }
}

/// One lexical piece of the input.
enum Token<'a> {
    Text(&'a str),
    Newline,
    Sgr(&'a str),
    Control,
}

/// Split off the next token starting at `input[0]`. Returns the token and
/// the number of bytes it spans.
fn next_token(input: &str) -> (Token<'_>, usize) {
    let bytes = input.as_bytes();
    match bytes[0] {
        b'\n' => (Token::Newline, 1),
        b'\r' if bytes.get(1) == Some(&b'\n') => (Token::Newline, 2),
        0x1b => match escape_len(bytes) {
            Some(EscapeKind::Sgr(len)) => (Token::Sgr(&input[2..len - 1]), len),
            Some(EscapeKind::Control(len)) => (Token::Control, len),
            // Malformed: emit the ESC byte literally and continue after it.
            None => (Token::Text(&input[..1]), 1),
        },
        _ => {
            let first = input.chars().next().map(char::len_utf8).unwrap_or(1);
            let end = input[first..]
                .find(['\n', '\r', '\x1b'])
                .map(|p| p + first)
                .unwrap_or(input.len());
            (Token::Text(&input[..end]), end)
        }
    }
}

enum EscapeKind {
    Sgr(usize),
    Control(usize),
}

/// Measure an escape sequence at the start of `bytes` (which begins with ESC).
fn escape_len(bytes: &[u8]) -> Option<EscapeKind> {
    match *bytes.get(1)? {
        b'[' => {
            let mut i = 2;
            while i < bytes.len() && (0x30..=0x3f).contains(&bytes[i]) {
                i += 1;
            }
            let params_end = i;
            while i < bytes.len() && (0x20..=0x2f).contains(&bytes[i]) {
                i += 1;
            }
            let final_byte = *bytes.get(i)?;
            if !(0x40..=0x7e).contains(&final_byte) {
                return None;
            }
            let len = i + 1;
            let params = &bytes[2..params_end];
            let plain_params = params.iter().all(|b| b.is_ascii_digit() || *b == b';' || *b == b':');
            if final_byte == b'm' && params_end == i && plain_params {
                Some(EscapeKind::Sgr(len))
            } else {
                Some(EscapeKind::Control(len))
            }
        }
        b']' => {
            let mut i = 2;
            while i < bytes.len() {
                match bytes[i] {
                    0x07 => return Some(EscapeKind::Control(i + 1)),
                    0x1b if bytes.get(i + 1) == Some(&b'\\') => {
                        return Some(EscapeKind::Control(i + 2));
                    }
                    _ => i += 1,
                }
            }
            None
        }
        0x20..=0x2f => {
            let mut i = 1;
            while i < bytes.len() && (0x20..=0x2f).contains(&bytes[i]) {
                i += 1;
            }
            match *bytes.get(i)? {
                0x30..=0x7e => Some(EscapeKind::Control(i + 1)),
                _ => None,
            }
        }
        0x30..=0x7e => Some(EscapeKind::Control(2)),
        _ => None,
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
}

/// HTML renderer holding the palette used for defaults.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer {
    palette: Palette,
}

impl HtmlRenderer {
    pub fn new(palette: Palette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Render a raw terminal buffer to an HTML fragment.
    pub fn render(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len() + raw.len() / 4);
        let mut state = SgrState::default();
        let mut run = String::new();
        let mut run_state = SgrState::default();

        let mut rest = raw;
        while !rest.is_empty() {
            let (token, len) = next_token(rest);
            match token {
                Token::Text(text) => {
                    if state != run_state {
                        self.flush(&mut out, &mut run, &run_state);
                        run_state = state.clone();
                    }
                    push_escaped(&mut run, text);
                }
                Token::Newline => {
                    if state != run_state {
                        self.flush(&mut out, &mut run, &run_state);
                        run_state = state.clone();
                    }
                    run.push_str("<br/>");
                }
                Token::Sgr(params) => state.apply(params),
                Token::Control => {}
            }
            rest = &rest[len..];
        }
        self.flush(&mut out, &mut run, &run_state);
        out
    }

    /// Render wrapped in a `<pre>` carrying the default colour pair.
    pub fn render_document(&self, raw: &str) -> String {
        let mut style = String::new();
        push_escaped(
            &mut style,
            &format!(
                "color:{};background-color:{}",
                self.palette.foreground, self.palette.background
            ),
        );
        format!("<pre style=\"{}\">{}</pre>", style, self.render(raw))
    }

    fn flush(&self, out: &mut String, run: &mut String, state: &SgrState) {
        if run.is_empty() {
            return;
        }
        if state.is_plain() {
            out.push_str(run);
        } else {
            out.push_str("<span style=\"");
            // Palette entries come from config; keep them inside the attribute
            push_escaped(out, &state.css(&self.palette));
            out.push_str("\">");
            out.push_str(run);
            out.push_str("</span>");
        }
        run.clear();
    }
}

/// Render with the default palette.
pub fn render(raw: &str) -> String {
    HtmlRenderer::default().render(raw)
}
