//! Layout pass: assigns element identity and on-screen geometry.
//!
//! Each body line of a tune becomes one staff system. Systems are stacked top to bottom
//! across the whole score; a titled tune reserves one staff height above its first
//! system.

use serde::{Deserialize, Serialize};

use crate::score::{ElementKind, ElementRef, Geometry, ScoreId, Tune, VisualElement};

use super::parser::ParsedTune;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LayoutOptions {
    pub left_margin: f64,
    pub top_margin: f64,
    pub staff_height: f64,
    pub system_spacing: f64,
    pub note_width: f64,
    pub bar_width: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            left_margin: 60.0,
            top_margin: 40.0,
            staff_height: 40.0,
            system_spacing: 100.0,
            note_width: 24.0,
            bar_width: 12.0,
        }
    }
}

pub fn layout(tunes: Vec<ParsedTune>, score: ScoreId, default_tempo: u16, options: &LayoutOptions) -> Vec<Tune> {
    let mut top = options.top_margin;

    tunes
        .into_iter()
        .enumerate()
        .map(|(tune_index, parsed)| {
            if parsed.title.is_some() {
                top += options.staff_height;
            }

            let mut x = options.left_margin;
            let mut line = 0;
            let mut systems = 0;
            let elements = parsed
                .items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    if item.line != line || systems == 0 {
                        if systems > 0 {
                            top += options.system_spacing;
                        }
                        systems += 1;
                        line = item.line;
                        x = options.left_margin;
                    }
                    let width = match item.kind {
                        ElementKind::Bar(_) => options.bar_width,
                        _ => options.note_width,
                    };
                    let geometry = Geometry {
                        x,
                        y: top,
                        width,
                        height: options.staff_height,
                    };
                    x += width;

                    VisualElement {
                        id: ElementRef {
                            score,
                            tune: tune_index,
                            index,
                        },
                        kind: item.kind,
                        range: item.range,
                        geometry,
                        pitches: item.pitches,
                        timing: item.timing,
                        tie: item.tie,
                    }
                })
                .collect();
            top += options.system_spacing;

            Tune {
                index: tune_index,
                title: parsed.title,
                tempo: parsed.tempo.unwrap_or(default_tempo),
                range: parsed.range,
                elements,
            }
        })
        .collect()
}
