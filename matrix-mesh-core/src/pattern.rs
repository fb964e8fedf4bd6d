//! Square bitmaps shown across the mesh.
//!
//! A [`Pattern`] is a fixed 32x32 grid of lit/unlit cells. The text form used
//! by the web form and the `IMG` broadcast is one line per row, `*` for a lit
//! cell and space for an unlit one.

use core::fmt;

use heapless::Vec;
use log::info;

/// Side length of every pattern, equal to the matrix width.
pub const PATTERN_SIDE: usize = 32;

/// Maximum number of built-in patterns in the rotation.
pub const MAX_BUILTIN_PATTERNS: usize = 8;

/// Characters kept by the text parser. Anything else is discarded.
const LIT: char = '*';
const UNLIT: char = ' ';

/// A 32x32 monochrome bitmap, one `u32` per row with bit `col` set when lit.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    rows: [u32; PATTERN_SIDE],
}

impl Pattern {
    /// All cells unlit
    pub const fn blank() -> Self {
        Self {
            rows: [0; PATTERN_SIDE],
        }
    }

    /// Whether the cell at `(row, col)` is lit. Out of range cells are unlit.
    pub fn get(&self, row: usize, col: usize) -> bool {
        row < PATTERN_SIDE && col < PATTERN_SIDE && self.rows[row] & (1 << col) != 0
    }

    /// Set a single cell. Out of range cells are ignored.
    pub fn set(&mut self, row: usize, col: usize, lit: bool) {
        if row >= PATTERN_SIDE || col >= PATTERN_SIDE {
            return;
        }
        if lit {
            self.rows[row] |= 1 << col;
        } else {
            self.rows[row] &= !(1 << col);
        }
    }

    /// Number of lit cells
    pub fn lit_count(&self) -> u32 {
        self.rows.iter().map(|row| row.count_ones()).sum()
    }

    /// Build a pattern from text rows.
    ///
    /// Only `*` and space count as cells; other characters are dropped before
    /// columns are assigned. Rows and columns beyond 32 are truncated, missing
    /// ones stay unlit.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut pattern = Self::blank();
        for (row, line) in rows.into_iter().take(PATTERN_SIDE).enumerate() {
            let cells = line.chars().filter(|&ch| ch == LIT || ch == UNLIT);
            for (col, ch) in cells.take(PATTERN_SIDE).enumerate() {
                if ch == LIT {
                    pattern.set(row, col, true);
                }
            }
        }
        pattern
    }

    /// Build a pattern from newline separated text
    pub fn parse(text: &str) -> Self {
        Self::from_rows(text.split('\n'))
    }

    /// Write the text form: trailing spaces and trailing empty rows are left out.
    pub fn write_text<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let used_rows = PATTERN_SIDE - self.rows.iter().rev().take_while(|&&r| r == 0).count();
        for (row, &bits) in self.rows[..used_rows].iter().enumerate() {
            if row > 0 {
                out.write_char('\n')?;
            }
            let width = (u32::BITS - bits.leading_zeros()) as usize;
            for col in 0..width {
                out.write_char(if bits & (1 << col) != 0 { LIT } else { UNLIT })?;
            }
        }
        Ok(())
    }

    /// Filled disc centred on the grid.
    ///
    /// The radius is given doubled so half-cell radii stay exact: a cell is lit
    /// when its centre lies within `radius + 0.5` of the grid centre.
    pub fn disc(doubled_radius: u32) -> Self {
        Self::from_distance(|d2| d2 <= outer_bound(doubled_radius))
    }

    /// One-cell-wide circle outline centred on the grid
    pub fn ring(doubled_radius: u32) -> Self {
        Self::from_distance(|d2| {
            d2 <= outer_bound(doubled_radius) && d2 >= inner_bound(doubled_radius)
        })
    }

    /// Several concentric outlines
    pub fn rings(doubled_radii: &[u32]) -> Self {
        Self::from_distance(|d2| {
            doubled_radii
                .iter()
                .any(|&r| d2 <= outer_bound(r) && d2 >= inner_bound(r))
        })
    }

    /// The "MESH" wordmark across the middle of the grid
    pub fn logo() -> Self {
        let mut pattern = Self::blank();
        for (index, glyph) in LOGO_GLYPHS.iter().enumerate() {
            let left = LOGO_LEFT + index * (GLYPH_WIDTH + GLYPH_GAP);
            for (dy, line) in glyph.iter().enumerate() {
                for (dx, ch) in line.chars().enumerate() {
                    if ch == LIT {
                        pattern.set(LOGO_TOP + dy, left + dx, true);
                    }
                }
            }
        }
        pattern
    }

    /// Light every cell whose doubled squared distance from the centre passes `lit`.
    fn from_distance(lit: impl Fn(u32) -> bool) -> Self {
        let mut pattern = Self::blank();
        let span = (PATTERN_SIDE - 1) as i32;
        for row in 0..PATTERN_SIDE {
            for col in 0..PATTERN_SIDE {
                let dr = 2 * row as i32 - span;
                let dc = 2 * col as i32 - span;
                if lit((dr * dr + dc * dc) as u32) {
                    pattern.set(row, col, true);
                }
            }
        }
        pattern
    }
}

/// Squared doubled distance of `radius + 0.5`
fn outer_bound(doubled_radius: u32) -> u32 {
    (doubled_radius + 1) * (doubled_radius + 1)
}

/// Squared doubled distance of `radius - 0.5`, zero for tiny radii
fn inner_bound(doubled_radius: u32) -> u32 {
    let inner = doubled_radius.saturating_sub(1);
    inner * inner
}

impl Default for Pattern {
    fn default() -> Self {
        Self::blank()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pattern {{")?;
        for bits in &self.rows {
            for col in 0..PATTERN_SIDE {
                f.write_str(if bits & (1 << col) != 0 { "#" } else { "." })?;
            }
            f.write_str("\n")?;
        }
        f.write_str("}")
    }
}

const GLYPH_WIDTH: usize = 5;
const GLYPH_GAP: usize = 2;
const LOGO_TOP: usize = 13;
const LOGO_LEFT: usize = 3;

const LOGO_GLYPHS: [[&str; 6]; 4] = [
    [
        "*   *", //
        "** **", //
        "* * *", //
        "*   *", //
        "*   *", //
        "*   *",
    ],
    [
        "*****", //
        "*    ", //
        "**** ", //
        "*    ", //
        "*    ", //
        "*****",
    ],
    [
        " ****", //
        "*    ", //
        " *** ", //
        "    *", //
        "    *", //
        "**** ",
    ],
    [
        "*   *", //
        "*   *", //
        "*****", //
        "*   *", //
        "*   *", //
        "*   *",
    ],
];

/// The patterns in rotation plus one replaceable custom slot.
///
/// While a custom pattern is installed it overrides the rotation.
#[derive(Debug, Clone)]
pub struct PatternLibrary {
    builtin: Vec<Pattern, MAX_BUILTIN_PATTERNS>,
    custom: Option<Pattern>,
}

impl PatternLibrary {
    /// Library holding the given rotation
    ///
    /// Patterns beyond [`MAX_BUILTIN_PATTERNS`] are dropped. An empty rotation
    /// gets a single blank pattern so indexing always has a target.
    pub fn new(patterns: &[Pattern]) -> Self {
        let mut builtin = Vec::new();
        for pattern in patterns.iter().take(MAX_BUILTIN_PATTERNS) {
            let _ = builtin.push(*pattern);
        }
        if builtin.is_empty() {
            let _ = builtin.push(Pattern::blank());
        }
        Self {
            builtin,
            custom: None,
        }
    }

    /// The stock rotation: big disc, small disc, outline, rings, logo.
    pub fn standard() -> Self {
        let edge = (PATTERN_SIDE - 1) as u32;
        Self::new(&[
            Pattern::disc(edge),
            Pattern::disc(10),
            Pattern::ring(edge),
            Pattern::rings(&[7, 15, 23, edge]),
            Pattern::logo(),
        ])
    }

    /// Number of patterns in the rotation
    pub fn builtin_count(&self) -> usize {
        self.builtin.len()
    }

    /// Rotation entry at `index`, wrapping around
    pub fn builtin(&self, index: usize) -> &Pattern {
        &self.builtin[index % self.builtin.len()]
    }

    /// The installed custom pattern, if any
    pub fn custom(&self) -> Option<&Pattern> {
        self.custom.as_ref()
    }

    /// Replace the custom slot. From now on it overrides the rotation.
    pub fn install_custom(&mut self, pattern: Pattern) {
        info!("Custom pattern installed ({} lit cells)", pattern.lit_count());
        self.custom = Some(pattern);
    }

    /// Drop the custom pattern and resume the rotation.
    ///
    /// Returns whether a custom pattern was installed.
    pub fn clear_custom(&mut self) -> bool {
        let had_custom = self.custom.take().is_some();
        if had_custom {
            info!("Custom pattern cleared, resuming rotation");
        }
        had_custom
    }

    /// Pattern to show for the scheduler's `index`: custom wins over rotation.
    pub fn current(&self, index: usize) -> &Pattern {
        self.custom.as_ref().unwrap_or_else(|| self.builtin(index))
    }
}

impl Default for PatternLibrary {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sets_only_stars() {
        let pattern = Pattern::parse("* *\n *\n\n**");
        assert!(pattern.get(0, 0));
        assert!(!pattern.get(0, 1));
        assert!(pattern.get(0, 2));
        assert!(pattern.get(1, 1));
        assert!(!pattern.get(2, 0));
        assert!(pattern.get(3, 0) && pattern.get(3, 1));
        assert_eq!(pattern.lit_count(), 5);
    }

    #[test]
    fn test_parse_discards_other_characters() {
        // '\r' and 'x' are dropped before columns are counted
        let pattern = Pattern::parse("x*\r\n*");
        assert!(pattern.get(0, 0));
        assert!(!pattern.get(0, 1));
        assert!(pattern.get(1, 0));
    }

    #[test]
    fn test_parse_truncates_oversize_text() {
        let wide = "*".repeat(40);
        let mut text = String::new();
        for _ in 0..40 {
            text.push_str(&wide);
            text.push('\n');
        }
        let pattern = Pattern::parse(&text);
        assert_eq!(pattern.lit_count(), (PATTERN_SIDE * PATTERN_SIDE) as u32);
    }

    #[test]
    fn test_text_form_reproduces_cells() {
        let text = "  *\n\n*  *\n *";
        let pattern = Pattern::parse(text);
        let mut out = String::new();
        pattern.write_text(&mut out).unwrap();
        assert_eq!(out, text);
        assert_eq!(Pattern::parse(&out), pattern);
    }

    #[test]
    fn test_blank_text_is_empty() {
        let mut out = String::new();
        Pattern::blank().write_text(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_full_disc_touches_edges_but_not_corners() {
        let disc = Pattern::disc(31);
        assert!(disc.get(0, 15) && disc.get(0, 16));
        assert!(disc.get(15, 0) && disc.get(16, 31));
        assert!(!disc.get(0, 0));
        assert!(!disc.get(31, 31));
        assert!(disc.get(15, 15));
    }

    #[test]
    fn test_small_disc_radius_five() {
        let disc = Pattern::disc(10);
        // centre (15.5, 15.5): from row 15, column 11 is ~4.53 away, column 10 ~5.52
        assert!(disc.get(15, 11));
        assert!(!disc.get(15, 10));
        assert!(disc.get(15, 20));
        assert!(!disc.get(15, 21));
    }

    #[test]
    fn test_ring_is_hollow() {
        let ring = Pattern::ring(31);
        assert!(ring.get(0, 15));
        assert!(!ring.get(15, 15));
        assert!(ring.lit_count() < Pattern::disc(31).lit_count());
    }

    #[test]
    fn test_patterns_are_symmetric() {
        for pattern in [Pattern::disc(31), Pattern::disc(10), Pattern::ring(31)] {
            for row in 0..PATTERN_SIDE {
                for col in 0..PATTERN_SIDE {
                    assert_eq!(pattern.get(row, col), pattern.get(col, row));
                    assert_eq!(pattern.get(row, col), pattern.get(31 - row, col));
                }
            }
        }
    }

    #[test]
    fn test_logo_sits_in_middle_rows() {
        let logo = Pattern::logo();
        assert!(logo.lit_count() > 0);
        for row in (0..LOGO_TOP).chain(LOGO_TOP + 6..PATTERN_SIDE) {
            for col in 0..PATTERN_SIDE {
                assert!(!logo.get(row, col));
            }
        }
        // M starts in the left margin column 3
        assert!(logo.get(LOGO_TOP, 3));
    }

    #[test]
    fn test_custom_overrides_rotation_until_cleared() {
        let mut library = PatternLibrary::standard();
        assert_eq!(library.builtin_count(), 5);
        assert_eq!(library.current(1), library.builtin(1));

        let custom = Pattern::parse("*");
        library.install_custom(custom);
        assert_eq!(library.current(1), &custom);
        assert_eq!(library.current(3), &custom);

        assert!(library.clear_custom());
        assert!(!library.clear_custom());
        assert_eq!(library.current(3), library.builtin(3));
    }

    #[test]
    fn test_builtin_index_wraps() {
        let library = PatternLibrary::standard();
        assert_eq!(library.builtin(7), library.builtin(2));
    }

    #[test]
    fn test_empty_rotation_gets_blank() {
        let library = PatternLibrary::new(&[]);
        assert_eq!(library.builtin_count(), 1);
        assert_eq!(library.builtin(4), &Pattern::blank());
    }
}
