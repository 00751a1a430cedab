//! Heuristic constants for the two detector variants

use serde::{Deserialize, Serialize};

use crate::geometry::Rectangle;

/// Which kind of screen text the detector is tuned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockVariant {
    /// Dense vertical speech-bubble text
    #[default]
    Manga,
    /// Sparse horizontal text in a game dialogue box
    GameTextbox,
}

/// Tunable constants of one detector variant
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicParams {
    /// Half-size of the window used to decide light-on-dark inversion
    pub sample_radius: u32,
    /// Horizontal and vertical stroke thickening radius
    pub erode_radius: (u32, u32),
    /// Components closer than this to the point define the exemplar size
    pub near_radius: f64,
    pub min_side: u32,
    pub max_side: u32,
    pub max_area: u64,
    /// At least one side must be longer than this
    pub min_long_side: u32,
    /// Rejection ratios against the exemplar
    pub max_width_ratio: f64,
    pub max_height_ratio: f64,
    pub max_area_ratio: f64,
    /// Growth per side as a fraction of the exemplar size, at the point itself
    pub growth_x: f64,
    pub growth_y: f64,
    /// Distance in pixels at which growth has halved
    pub growth_falloff: f64,
    /// Split-kana detection: one side below `short`, the other above `long` (fractions of the exemplar)
    pub split_kana_short: f64,
    pub split_kana_long: f64,
    /// Margin added around the final block
    pub margin: u32,
    /// Cut the block where the upper edge jumps by more than this many exemplar heights
    pub slice_jump_ratio: Option<f64>,
}

impl HeuristicParams {
    pub fn for_variant(variant: BlockVariant) -> Self {
        match variant {
            BlockVariant::Manga => Self::manga(),
            BlockVariant::GameTextbox => Self::game_textbox(),
        }
    }

    /// Columns sit close together; lines inside a column closer still
    pub fn manga() -> Self {
        Self {
            sample_radius: 20,
            erode_radius: (1, 1),
            near_radius: 50.0,
            min_side: 2,
            max_side: 150,
            max_area: 4000,
            min_long_side: 5,
            max_width_ratio: 3.0,
            max_height_ratio: 4.0,
            max_area_ratio: 5.0,
            growth_x: 0.5,
            growth_y: 0.8,
            growth_falloff: 150.0,
            split_kana_short: 0.5,
            split_kana_long: 0.7,
            margin: 4,
            slice_jump_ratio: Some(1.5),
        }
    }

    /// Wide lines with word-sized gaps and generous line spacing
    pub fn game_textbox() -> Self {
        Self {
            sample_radius: 20,
            erode_radius: (1, 1),
            near_radius: 50.0,
            min_side: 2,
            max_side: 150,
            max_area: 4000,
            min_long_side: 5,
            max_width_ratio: 3.0,
            max_height_ratio: 4.0,
            max_area_ratio: 5.0,
            growth_x: 0.9,
            growth_y: 0.5,
            growth_falloff: 250.0,
            split_kana_short: 0.5,
            split_kana_long: 0.7,
            margin: 6,
            slice_jump_ratio: None,
        }
    }

    /// Could this component be (part of) a character?
    pub fn is_plausible(&self, bounds: &Rectangle) -> bool {
        let (w, h) = (bounds.width(), bounds.height());
        w >= self.min_side
            && h >= self.min_side
            && w <= self.max_side
            && h <= self.max_side
            && bounds.area() < self.max_area
            && w.max(h) > self.min_long_side
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plausibility_bounds() {
        let params = HeuristicParams::manga();
        assert!(params.is_plausible(&Rectangle::from_xywh(0, 0, 20, 20).unwrap()));
        // speck
        assert!(!params.is_plausible(&Rectangle::from_xywh(0, 0, 1, 8).unwrap()));
        // both sides too short
        assert!(!params.is_plausible(&Rectangle::from_xywh(0, 0, 5, 5).unwrap()));
        // panel border
        assert!(!params.is_plausible(&Rectangle::from_xywh(0, 0, 160, 10).unwrap()));
        // area just over the limit
        assert!(!params.is_plausible(&Rectangle::from_xywh(0, 0, 80, 50).unwrap()));
    }

    #[test]
    fn test_variant_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            variant: BlockVariant,
        }
        let parsed: Wrapper = toml::from_str("variant = \"game_textbox\"").unwrap();
        assert_eq!(parsed.variant, BlockVariant::GameTextbox);
        assert_eq!(HeuristicParams::for_variant(parsed.variant), HeuristicParams::game_textbox());
    }
}
