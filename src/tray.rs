//! Menu bar integration.
//!
//! One status item with a toggle for the interception, a lines-per-notch
//! submenu, and Quit. Menu items are main-thread objects; the controller
//! loop in `main` owns this state and is the only writer.

use tray_icon::menu::{CheckMenuItem, Menu, MenuId, MenuItem, PredefinedMenuItem, Submenu};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

use crate::scroll::{LineStep, MAX_LINES, MIN_LINES};

/// Menu item IDs
pub const MENU_ID_TOGGLE: &str = "toggle";
pub const MENU_ID_QUIT: &str = "quit";
const MENU_ID_LINES_PREFIX: &str = "lines-";

/// The status item plus the handles needed to keep the menu in sync.
pub struct TrayMenu {
    _tray: TrayIcon,
    toggle: CheckMenuItem,
    line_items: Vec<CheckMenuItem>,
}

/// Builds the status item and its menu. Must run on the main thread.
pub fn setup_tray(step: LineStep, active: bool) -> Result<TrayMenu, Box<dyn std::error::Error>> {
    let icon = create_icon()?;
    let menu = Menu::new();

    let toggle = CheckMenuItem::with_id(
        MenuId::new(MENU_ID_TOGGLE),
        "Pin wheel scrolling",
        true,
        active,
        None,
    );
    let _ = menu.append(&toggle);

    let lines = Submenu::new("Lines per notch", true);
    let mut line_items = Vec::new();
    for n in MIN_LINES..=MAX_LINES {
        let label = if n == 1 {
            "1 line".to_string()
        } else {
            format!("{} lines", n)
        };
        let item = CheckMenuItem::with_id(
            MenuId::new(format!("{}{}", MENU_ID_LINES_PREFIX, n)),
            label,
            !active,
            n == step.lines(),
            None,
        );
        let _ = lines.append(&item);
        line_items.push(item);
    }
    let _ = menu.append(&lines);

    let _ = menu.append(&PredefinedMenuItem::separator());
    let _ = menu.append(&MenuItem::with_id(MenuId::new(MENU_ID_QUIT), "Quit", true, None));

    let tray = TrayIconBuilder::new()
        .with_tooltip("ScrollStep")
        .with_icon(icon)
        .with_icon_as_template(true)
        .with_menu(Box::new(menu))
        .build()?;

    tracing::info!("menu bar item initialized");
    Ok(TrayMenu {
        _tray: tray,
        toggle,
        line_items,
    })
}

impl TrayMenu {
    /// Syncs the menu to the lifecycle state: checkmark on the toggle, line
    /// selection locked while the worker runs.
    pub fn set_active(&self, active: bool) {
        self.toggle.set_checked(active);
        for item in &self.line_items {
            item.set_enabled(!active);
        }
    }

    /// Moves the line-count checkmark to `lines`.
    pub fn select_lines(&self, lines: i64) {
        for (item, n) in self.line_items.iter().zip(MIN_LINES..=MAX_LINES) {
            item.set_checked(n == lines);
        }
    }
}

/// Parses a `lines-N` menu id back into its line count.
pub fn line_count(menu_id: &str) -> Option<i64> {
    menu_id.strip_prefix(MENU_ID_LINES_PREFIX)?.parse().ok()
}

/// Generates the status glyph: three bars suggesting text lines. Rendered
/// as a template image so macOS recolors it for the menu bar.
fn create_icon() -> Result<Icon, Box<dyn std::error::Error>> {
    let size = 32u32;
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);

    for y in 0..size {
        for x in 0..size {
            let bar = matches!(y, 7..=10 | 14..=17 | 21..=24) && (6..26).contains(&x);
            if bar {
                rgba.extend_from_slice(&[0, 0, 0, 255]);
            } else {
                rgba.extend_from_slice(&[0, 0, 0, 0]);
            }
        }
    }

    Icon::from_rgba(rgba, size, size).map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_count_parses_own_ids() {
        assert_eq!(line_count("lines-1"), Some(1));
        assert_eq!(line_count("lines-10"), Some(10));
        assert_eq!(line_count("toggle"), None);
        assert_eq!(line_count("lines-"), None);
    }
}
