use anyhow::Error;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::models::{Setlist, Song};

/// One row of a song table: title and artist, then the performance details.
pub(crate) fn song_line(prefix: &str, song: &Song, selected: bool) -> Line<'static> {
    let title_style = if selected {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let detail_style = Style::default().fg(Color::DarkGray);

    let mut details = vec![song.duration.clone(), format!("key {}", song.key)];
    if let Some(bpm) = song.bpm {
        details.push(format!("{bpm} bpm"));
    }
    if let Some(genre) = song.genre.as_deref().filter(|genre| !genre.is_empty()) {
        details.push(genre.to_string());
    }

    Line::from(vec![
        Span::raw(prefix.to_string()),
        Span::styled(song.display_title(), title_style),
        Span::styled(format!("  {}", details.join(" · ")), detail_style),
    ])
}

/// One row of the setlist overview.
pub(crate) fn setlist_line(setlist: &Setlist, song_count: usize, selected: bool) -> Line<'static> {
    let name_style = if selected {
        Style::default().add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let songs = match song_count {
        1 => "1 song".to_string(),
        n => format!("{n} songs"),
    };

    Line::from(vec![
        Span::styled(setlist.name.clone(), name_style),
        Span::raw(format!("  {} · {}", setlist.venue, setlist.date)),
        Span::styled(format!("  ({songs})"), Style::default().fg(Color::DarkGray)),
    ])
}

/// Produce a rectangle centered within `area` that spans the requested percent
/// of the width and height. Used for modal dialogs.
pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(area);

    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(horizontal[1]);

    vertical[1]
}

/// Extract the most relevant error message from a chained error.
pub(crate) fn surface_error(err: &Error) -> String {
    err.chain()
        .last()
        .map(|cause| cause.to_string())
        .unwrap_or_else(|| err.to_string())
}
