//! Deterministic grid placement for relationship groups and the characters
//! left outside of them.
//!
//! Groups sit on a fixed grid (three per row by default) with their members
//! in a single row under the group label. Ungrouped characters are placed
//! in a separate grid region, skipping any cell that lands inside a group's
//! reserved rectangle.

use serde::{Deserialize, Serialize};

use crate::grouping::{analyze_and_group, CharacterGroup};
use crate::tree::{Character, Position};

/// Grid constants used by grouping and placement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayoutConfig {
    /// Center of the first group
    pub group_origin: Position,
    /// Groups per grid row
    pub groups_per_row: usize,
    /// Horizontal distance between group centers
    pub group_spacing: f64,
    /// Added to `group_spacing` between group rows
    pub group_row_extra: f64,
    /// Distance between neighbouring characters
    pub character_spacing: f64,
    /// Vertical offset of the member row below the group label
    pub member_offset_y: f64,
    /// Half width of a group's reserved rectangle
    pub zone_half_width: f64,
    /// Reserved space above the group center
    pub zone_above: f64,
    /// Reserved space below the group center
    pub zone_below: f64,
    /// First cell of the ungrouped region
    pub ungrouped_origin: Position,
    /// Ungrouped cells per row before the initial wrap
    pub ungrouped_columns: usize,
    /// Scanning past this x wraps back to the region's first column
    pub ungrouped_max_x: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            group_origin: Position::new(200.0, 200.0),
            groups_per_row: 3,
            group_spacing: 500.0,
            group_row_extra: 150.0,
            character_spacing: 150.0,
            member_offset_y: 80.0,
            zone_half_width: 300.0,
            zone_above: 50.0,
            zone_below: 150.0,
            ungrouped_origin: Position::new(800.0, 150.0),
            ungrouped_columns: 3,
            ungrouped_max_x: 1200.0,
        }
    }
}

impl LayoutConfig {
    fn columns(&self) -> usize {
        self.groups_per_row.max(1)
    }

    fn ungrouped_columns(&self) -> usize {
        self.ungrouped_columns.max(1)
    }

    // Spacing below one unit would stall the ungrouped scan.
    fn step(&self) -> f64 {
        self.character_spacing.max(1.0)
    }
}

/// Axis-aligned rectangle with inclusive bounds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, point: Position) -> bool {
        point.x >= self.x
            && point.x <= self.x + self.width
            && point.y >= self.y
            && point.y <= self.y + self.height
    }
}

/// Center of the group occupying grid slot `index`
pub fn group_center(index: usize, config: &LayoutConfig) -> Position {
    let column = index % config.columns();
    let row = index / config.columns();
    Position {
        x: config.group_origin.x + column as f64 * config.group_spacing,
        y: config.group_origin.y + row as f64 * (config.group_spacing + config.group_row_extra),
    }
}

/// Rectangle reserved for a group's label and member row
pub fn exclusion_zone(group: &CharacterGroup, config: &LayoutConfig) -> Rect {
    Rect {
        x: group.position.x - config.zone_half_width,
        y: group.position.y - config.zone_above,
        width: config.zone_half_width * 2.0,
        height: config.zone_above + config.zone_below,
    }
}

/// Lay the group's members out in one row centered under the group.
///
/// Characters outside the group are returned unchanged. The result depends
/// only on the group and each member's index in `group.character_ids`.
pub fn position_characters_in_group(
    group: &CharacterGroup,
    characters: &[Character],
    config: &LayoutConfig,
) -> Vec<Character> {
    let member_count = group.character_ids.len();
    let total_width = member_count.saturating_sub(1) as f64 * config.character_spacing;
    let start_x = group.position.x - total_width / 2.0;
    let y = group.position.y + config.member_offset_y;

    characters
        .iter()
        .map(|character| {
            match group.character_ids.iter().position(|id| *id == character.id) {
                Some(index) => Character {
                    position: Position {
                        x: start_x + index as f64 * config.character_spacing,
                        y,
                    },
                    ..character.clone()
                },
                None => character.clone(),
            }
        })
        .collect()
}

/// Place ungrouped characters on their own grid, avoiding group rectangles.
///
/// Greedy and order dependent: each character starts from its own cell and
/// walks right (wrapping down a row past `ungrouped_max_x`) until the point
/// is outside every group rectangle. Ungrouped characters are not checked
/// against each other.
pub fn position_ungrouped_characters(
    ungrouped: &[Character],
    groups: &[CharacterGroup],
    config: &LayoutConfig,
) -> Vec<Character> {
    let zones: Vec<Rect> = groups.iter().map(|g| exclusion_zone(g, config)).collect();
    let step = config.step();
    let columns = config.ungrouped_columns();

    ungrouped
        .iter()
        .enumerate()
        .map(|(index, character)| {
            let mut point = Position {
                x: config.ungrouped_origin.x + (index % columns) as f64 * step,
                y: config.ungrouped_origin.y + (index / columns) as f64 * step,
            };

            while zones.iter().any(|zone| zone.contains(point)) {
                point.x += step;
                if point.x > config.ungrouped_max_x {
                    point.x = config.ungrouped_origin.x;
                    point.y += step;
                }
            }

            Character {
                position: point,
                ..character.clone()
            }
        })
        .collect()
}

/// Full pass: group, place members, then place everyone else.
///
/// Returns every character (input order kept) with its new position plus the
/// groups used. A character in several groups ends up where the last of
/// those groups put it.
pub fn auto_layout(characters: &[Character], config: &LayoutConfig) -> (Vec<Character>, Vec<CharacterGroup>) {
    let grouping = analyze_and_group(characters, config);

    let mut positioned = characters.to_vec();
    for group in &grouping.groups {
        positioned = position_characters_in_group(group, &positioned, config);
    }

    let placed = position_ungrouped_characters(&grouping.ungrouped_characters, &grouping.groups, config);
    for laid_out in placed {
        if let Some(slot) = positioned.iter_mut().find(|c| c.id == laid_out.id) {
            slot.position = laid_out.position;
        }
    }

    tracing::debug!(
        groups = grouping.groups.len(),
        ungrouped = grouping.ungrouped_characters.len(),
        "auto layout computed"
    );
    (positioned, grouping.groups)
}
