use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use anyhow::Result;
use crossterm::event::KeyCode;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use tracing::debug;

use crate::client::DataAccessClient;
use crate::models::{Setlist, SetlistId, Song};
use crate::store::{setlist_songs, CachePatch, MusicBoardStore};

use super::forms::{
    step, AuthField, AuthForm, AuthIntent, ConfirmDelete, SetlistField, SetlistForm, SongField,
    SongForm, SongPicker,
};
use super::helpers::{centered_rect, setlist_line, song_line, surface_error};

/// Footer space reserved for status messages and instructions.
const FOOTER_HEIGHT: u16 = 3;
/// Lines above the song list on the setlist detail screen.
const DETAIL_HEADER_HEIGHT: u16 = 5;

/// Top-level views.
enum Screen {
    Setlists,
    SetlistDetail { setlist_id: SetlistId, selected: usize },
    Songs { selected: usize },
}

/// Modal state layered over the current screen.
enum Mode {
    Normal,
    CreatingSetlist(SetlistForm),
    EditingSetlist { id: SetlistId, form: SetlistForm },
    CreatingSong(SongForm),
    EditingSong { id: i64, form: SongForm },
    PickingSong(SongPicker),
    ConfirmDelete(ConfirmDelete),
    Authenticating(AuthForm),
}

/// Holds the footer message text plus its severity.
struct StatusMessage {
    text: String,
    kind: StatusKind,
}

/// Severity levels shown in the footer.
enum StatusKind {
    Info,
    Error,
}

impl StatusKind {
    fn style(&self) -> Style {
        match self {
            StatusKind::Info => Style::default().fg(Color::Green),
            StatusKind::Error => Style::default().fg(Color::Red),
        }
    }
}

/// Central application state shared across the TUI.
pub struct App {
    store: MusicBoardStore,
    client: Arc<DataAccessClient>,
    screen: Screen,
    selected: usize,
    mode: Mode,
    status: Option<StatusMessage>,
    working: bool,
}

impl App {
    pub fn new(store: MusicBoardStore) -> Self {
        let client = Arc::clone(store.client());
        let status = store.error().map(|message| StatusMessage {
            text: message.to_string(),
            kind: StatusKind::Error,
        });
        Self {
            store,
            client,
            screen: Screen::Setlists,
            selected: 0,
            mode: Mode::Normal,
            status,
            working: false,
        }
    }

    /// Flag a key press as being processed so the next frame shows the busy
    /// indicator before the backend round trip starts.
    pub(crate) fn set_working(&mut self, working: bool) {
        self.working = working;
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.working || self.client.is_busy()
    }

    pub async fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let mut exit = false;
        let mode = mem::replace(&mut self.mode, Mode::Normal);

        self.mode = match mode {
            Mode::Normal => self.handle_normal_key(code, &mut exit).await?,
            Mode::CreatingSetlist(form) => self.handle_setlist_form(code, None, form).await?,
            Mode::EditingSetlist { id, form } => {
                self.handle_setlist_form(code, Some(id), form).await?
            }
            Mode::CreatingSong(form) => self.handle_song_form(code, None, form).await?,
            Mode::EditingSong { id, form } => self.handle_song_form(code, Some(id), form).await?,
            Mode::PickingSong(picker) => self.handle_pick_song(code, picker).await?,
            Mode::ConfirmDelete(confirm) => self.handle_confirm_delete(code, confirm).await?,
            Mode::Authenticating(form) => self.handle_auth_form(code, form).await?,
        };

        Ok(exit)
    }

    async fn handle_normal_key(&mut self, code: KeyCode, exit: &mut bool) -> Result<Mode> {
        // Keys shared by every screen.
        match code {
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.reload().await;
                return Ok(Mode::Normal);
            }
            KeyCode::Char('i') => {
                self.clear_status();
                return Ok(self.open_auth(AuthIntent::SignIn));
            }
            KeyCode::Char('u') => {
                self.clear_status();
                return Ok(self.open_auth(AuthIntent::SignUp));
            }
            KeyCode::Char('o') => {
                self.sign_out().await;
                return Ok(Mode::Normal);
            }
            KeyCode::Char('q') => {
                *exit = true;
                return Ok(Mode::Normal);
            }
            _ => {}
        }

        match self.screen {
            Screen::Setlists => match code {
                KeyCode::Esc => *exit = true,
                KeyCode::Up => self.move_setlist_selection(-1),
                KeyCode::Down => self.move_setlist_selection(1),
                KeyCode::Tab => self.screen = Screen::Songs { selected: 0 },
                KeyCode::Enter => match self.current_setlist().map(|setlist| setlist.id) {
                    Some(setlist_id) => {
                        self.clear_status();
                        self.screen = Screen::SetlistDetail {
                            setlist_id,
                            selected: 0,
                        };
                    }
                    None => self.set_status("No setlist selected.", StatusKind::Error),
                },
                KeyCode::Char('+') => {
                    self.clear_status();
                    return Ok(Mode::CreatingSetlist(SetlistForm::default()));
                }
                KeyCode::Char('e') | KeyCode::Char('E') => match self.current_setlist() {
                    Some(setlist) => {
                        let mode = Mode::EditingSetlist {
                            id: setlist.id,
                            form: SetlistForm::from_setlist(setlist),
                        };
                        self.clear_status();
                        return Ok(mode);
                    }
                    None => self.set_status("No setlist selected to edit.", StatusKind::Error),
                },
                KeyCode::Char('-') => match self.current_setlist() {
                    Some(setlist) => {
                        let confirm = ConfirmDelete::from_setlist(setlist);
                        self.clear_status();
                        return Ok(Mode::ConfirmDelete(confirm));
                    }
                    None => self.set_status("No setlist selected to delete.", StatusKind::Error),
                },
                _ => {}
            },
            Screen::SetlistDetail {
                setlist_id,
                ref mut selected,
            } => {
                let Some(setlist) = self.store.find_setlist(setlist_id) else {
                    self.screen = Screen::Setlists;
                    return Ok(Mode::Normal);
                };
                let songs = setlist_songs(setlist);
                match code {
                    KeyCode::Esc | KeyCode::Backspace => {
                        self.screen = Screen::Setlists;
                    }
                    KeyCode::Up => *selected = step(*selected, songs.len(), -1),
                    KeyCode::Down => *selected = step(*selected, songs.len(), 1),
                    KeyCode::Char('+') => {
                        let picker = song_picker(setlist, self.store.songs());
                        if picker.candidates.is_empty() {
                            self.set_status(
                                "Every catalog song is already in this setlist.",
                                StatusKind::Info,
                            );
                        } else {
                            self.clear_status();
                            return Ok(Mode::PickingSong(picker));
                        }
                    }
                    KeyCode::Char('-') => match songs.get(*selected) {
                        Some(song) => {
                            let confirm = ConfirmDelete::SetlistEntry {
                                setlist_id,
                                song_id: song.id,
                                title: song.title.clone(),
                            };
                            self.clear_status();
                            return Ok(Mode::ConfirmDelete(confirm));
                        }
                        None => self.set_status("No song selected to remove.", StatusKind::Error),
                    },
                    KeyCode::Char('e') | KeyCode::Char('E') => {
                        let form = SetlistForm::from_setlist(setlist);
                        self.clear_status();
                        return Ok(Mode::EditingSetlist {
                            id: setlist_id,
                            form,
                        });
                    }
                    _ => {}
                }
            }
            Screen::Songs { ref mut selected } => {
                let count = self.store.songs_count();
                match code {
                    KeyCode::Esc | KeyCode::Tab => self.screen = Screen::Setlists,
                    KeyCode::Up => *selected = step(*selected, count, -1),
                    KeyCode::Down => *selected = step(*selected, count, 1),
                    KeyCode::Char('+') => {
                        self.clear_status();
                        return Ok(Mode::CreatingSong(SongForm::default()));
                    }
                    KeyCode::Char('e') | KeyCode::Char('E') => {
                        match self.store.songs().get(*selected) {
                            Some(song) => {
                                let mode = Mode::EditingSong {
                                    id: song.id,
                                    form: SongForm::from_song(song),
                                };
                                self.clear_status();
                                return Ok(mode);
                            }
                            None => self.set_status("No song selected to edit.", StatusKind::Error),
                        }
                    }
                    KeyCode::Char('-') => match self.store.songs().get(*selected) {
                        Some(song) => {
                            let confirm = ConfirmDelete::from_song(song);
                            self.clear_status();
                            return Ok(Mode::ConfirmDelete(confirm));
                        }
                        None => self.set_status("No song selected to delete.", StatusKind::Error),
                    },
                    _ => {}
                }
            }
        }
        Ok(Mode::Normal)
    }

    async fn handle_setlist_form(
        &mut self,
        code: KeyCode,
        id: Option<SetlistId>,
        mut form: SetlistForm,
    ) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.prev_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => {
                let saved = match id {
                    Some(id) => self.save_existing_setlist(id, &form).await,
                    None => self.save_new_setlist(&form).await,
                };
                match saved {
                    Ok(()) => keep_open = false,
                    Err(err) => {
                        let message = surface_error(&err);
                        form.error = Some(message.clone());
                        self.set_status(message, StatusKind::Error);
                    }
                }
            }
            KeyCode::Char(ch) if form.push_char(ch) => form.error = None,
            _ => {}
        }

        Ok(match (keep_open, id) {
            (false, _) => Mode::Normal,
            (true, Some(id)) => Mode::EditingSetlist { id, form },
            (true, None) => Mode::CreatingSetlist(form),
        })
    }

    async fn handle_song_form(
        &mut self,
        code: KeyCode,
        id: Option<i64>,
        mut form: SongForm,
    ) -> Result<Mode> {
        let mut keep_open = true;
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                keep_open = false;
            }
            KeyCode::Tab | KeyCode::Down => form.next_field(),
            KeyCode::BackTab | KeyCode::Up => form.prev_field(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => {
                let saved = match id {
                    Some(id) => self.save_existing_song(id, &form).await,
                    None => self.save_new_song(&form).await,
                };
                match saved {
                    Ok(()) => keep_open = false,
                    Err(err) => {
                        let message = surface_error(&err);
                        form.error = Some(message.clone());
                        self.set_status(message, StatusKind::Error);
                    }
                }
            }
            KeyCode::Char(ch) if form.push_char(ch) => form.error = None,
            _ => {}
        }

        Ok(match (keep_open, id) {
            (false, _) => Mode::Normal,
            (true, Some(id)) => Mode::EditingSong { id, form },
            (true, None) => Mode::CreatingSong(form),
        })
    }

    async fn handle_pick_song(&mut self, code: KeyCode, mut picker: SongPicker) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Up => {
                picker.move_selection(-1);
                Ok(Mode::PickingSong(picker))
            }
            KeyCode::Down => {
                picker.move_selection(1);
                Ok(Mode::PickingSong(picker))
            }
            KeyCode::Enter => {
                let Some(song) = picker.current().cloned() else {
                    return Ok(Mode::Normal);
                };
                let added = self
                    .store
                    .add_song_to_setlist(picker.setlist_id, song.id, Some(picker.next_position))
                    .await;
                match added {
                    Ok(_) => {
                        self.set_status(format!("Added \"{}\".", song.title), StatusKind::Info);
                        Ok(Mode::Normal)
                    }
                    Err(err) => {
                        self.set_status(err.to_string(), StatusKind::Error);
                        Ok(Mode::PickingSong(picker))
                    }
                }
            }
            _ => Ok(Mode::PickingSong(picker)),
        }
    }

    async fn handle_confirm_delete(&mut self, code: KeyCode, confirm: ConfirmDelete) -> Result<Mode> {
        match code {
            KeyCode::Esc | KeyCode::Char('n') | KeyCode::Char('N') => {
                self.set_status("Deletion cancelled.", StatusKind::Info);
                Ok(Mode::Normal)
            }
            KeyCode::Enter | KeyCode::Char('y') | KeyCode::Char('Y') => {
                match self.perform_delete(&confirm).await {
                    Ok(()) => Ok(Mode::Normal),
                    Err(err) => {
                        self.set_status(surface_error(&err), StatusKind::Error);
                        Ok(Mode::ConfirmDelete(confirm))
                    }
                }
            }
            _ => Ok(Mode::ConfirmDelete(confirm)),
        }
    }

    async fn handle_auth_form(&mut self, code: KeyCode, mut form: AuthForm) -> Result<Mode> {
        match code {
            KeyCode::Esc => {
                self.set_status("Cancelled.", StatusKind::Info);
                return Ok(Mode::Normal);
            }
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => form.toggle_field(),
            KeyCode::F(2) => form.toggle_intent(),
            KeyCode::Backspace => form.backspace(),
            KeyCode::Enter => match self.authenticate(&form).await {
                Ok(()) => return Ok(Mode::Normal),
                Err(err) => {
                    let message = surface_error(&err);
                    form.error = Some(message.clone());
                    self.set_status(message, StatusKind::Error);
                }
            },
            KeyCode::Char(ch) if form.push_char(ch) => form.error = None,
            _ => {}
        }
        Ok(Mode::Authenticating(form))
    }

    pub(crate) fn draw(&self, frame: &mut Frame) {
        let area = frame.area();
        let footer_height = FOOTER_HEIGHT.min(area.height);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(0),
                Constraint::Length(footer_height),
            ])
            .split(area);

        self.draw_header(frame, chunks[0]);
        match &self.screen {
            Screen::Setlists => self.draw_setlists(frame, chunks[1]),
            Screen::SetlistDetail {
                setlist_id,
                selected,
            } => self.draw_setlist_detail(frame, chunks[1], *setlist_id, *selected),
            Screen::Songs { selected } => self.draw_songs(frame, chunks[1], *selected),
        }
        self.draw_footer(frame, chunks[2]);

        match &self.mode {
            Mode::Normal => {}
            Mode::CreatingSetlist(form) => self.draw_setlist_form(frame, area, "New Setlist", form),
            Mode::EditingSetlist { form, .. } => {
                self.draw_setlist_form(frame, area, "Edit Setlist", form)
            }
            Mode::CreatingSong(form) => self.draw_song_form(frame, area, "New Song", form),
            Mode::EditingSong { form, .. } => self.draw_song_form(frame, area, "Edit Song", form),
            Mode::PickingSong(picker) => self.draw_song_picker(frame, area, picker),
            Mode::ConfirmDelete(confirm) => self.draw_confirm_delete(frame, area, confirm),
            Mode::Authenticating(form) => self.draw_auth_form(frame, area, form),
        }
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect) {
        let active = Style::default()
            .fg(Color::Black)
            .bg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let (setlists_style, songs_style) = match self.screen {
            Screen::Songs { .. } => (Style::default(), active),
            _ => (active, Style::default()),
        };

        let user = match self.client.user() {
            Some(user) => format!("  signed in as {}", user.email.unwrap_or(user.id)),
            None => "  not signed in".to_string(),
        };

        let line = Line::from(vec![
            Span::styled(format!(" Setlists ({}) ", self.store.setlists_count()), setlists_style),
            Span::raw(" "),
            Span::styled(format!(" Songs ({}) ", self.store.songs_count()), songs_style),
            Span::styled(user, Style::default().fg(Color::DarkGray)),
        ]);
        frame.render_widget(Paragraph::new(line), area);
    }

    fn draw_setlists(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().title("Setlists").borders(Borders::ALL);
        if !self.store.has_setlists() {
            let message = Paragraph::new("No setlists yet. Press '+' to add one.")
                .alignment(Alignment::Center)
                .block(block);
            frame.render_widget(message, area);
            return;
        }

        let items: Vec<ListItem> = self
            .store
            .setlists()
            .iter()
            .enumerate()
            .map(|(idx, setlist)| {
                let count = setlist_songs(setlist).len();
                ListItem::new(setlist_line(setlist, count, idx == self.selected))
            })
            .collect();
        render_list(frame, area, items, block, self.selected);
    }

    fn draw_setlist_detail(&self, frame: &mut Frame, area: Rect, id: SetlistId, selected: usize) {
        let Some(setlist) = self.store.find_setlist(id) else {
            let message = Paragraph::new("This setlist no longer exists.")
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL));
            frame.render_widget(message, area);
            return;
        };

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(DETAIL_HEADER_HEIGHT), Constraint::Min(0)])
            .split(area);

        let mut info = vec![
            Line::from(Span::styled(
                setlist.name.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(format!("{} · {}", setlist.venue, setlist.date)),
        ];
        if let Some(description) = setlist.description.as_deref() {
            info.push(Line::from(Span::styled(
                description.to_string(),
                Style::default().fg(Color::Gray),
            )));
        }
        let header = Paragraph::new(info)
            .block(Block::default().borders(Borders::ALL))
            .wrap(Wrap { trim: true });
        frame.render_widget(header, chunks[0]);

        let songs = setlist_songs(setlist);
        let block = Block::default().title("Running Order").borders(Borders::ALL);
        if songs.is_empty() {
            let message = Paragraph::new("No songs in this setlist. Press '+' to add one.")
                .alignment(Alignment::Center)
                .block(block);
            frame.render_widget(message, chunks[1]);
            return;
        }

        let items: Vec<ListItem> = songs
            .iter()
            .enumerate()
            .map(|(idx, song)| {
                let prefix = format!("{:>2}. ", idx + 1);
                ListItem::new(song_line(&prefix, song, idx == selected))
            })
            .collect();
        render_list(frame, chunks[1], items, block, selected);
    }

    fn draw_songs(&self, frame: &mut Frame, area: Rect, selected: usize) {
        let block = Block::default().title("Song Catalog").borders(Borders::ALL);
        if !self.store.has_songs() {
            let message = Paragraph::new("No songs yet. Press '+' to add one.")
                .alignment(Alignment::Center)
                .block(block);
            frame.render_widget(message, area);
            return;
        }

        let items: Vec<ListItem> = self
            .store
            .songs()
            .iter()
            .enumerate()
            .map(|(idx, song)| ListItem::new(song_line("", song, idx == selected)))
            .collect();
        render_list(frame, area, items, block, selected);
    }

    fn draw_footer(&self, frame: &mut Frame, area: Rect) {
        let block = Block::default().borders(Borders::TOP);
        frame.render_widget(block.clone(), area);
        let inner = block.inner(area);

        let mut status_spans = Vec::new();
        if self.is_busy() {
            status_spans.push(Span::styled(
                "Working... ",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ));
        }
        if let Some(status) = &self.status {
            status_spans.push(Span::styled(status.text.clone(), status.kind.style()));
        }

        let paragraph = Paragraph::new(vec![Line::from(status_spans), self.footer_instructions()])
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn footer_instructions(&self) -> Line<'static> {
        let key_style = Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD);
        let mut keys: Vec<(&str, &str)> = match (&self.mode, &self.screen) {
            (Mode::PickingSong(_), _) => vec![("[↑↓]", "Navigate"), ("[Enter]", "Add"), ("[Esc]", "Cancel")],
            (Mode::ConfirmDelete(_), _) => vec![("[Y]", "Confirm"), ("[N]", "Cancel")],
            (Mode::Authenticating(_), _) => vec![
                ("[Tab]", "Switch field"),
                ("[F2]", "Sign in/up"),
                ("[Enter]", "Submit"),
                ("[Esc]", "Cancel"),
            ],
            (Mode::Normal, Screen::Setlists) => vec![
                ("[↑↓]", "Navigate"),
                ("[Enter]", "Open"),
                ("[+]", "New"),
                ("[e]", "Edit"),
                ("[-]", "Delete"),
                ("[Tab]", "Songs"),
            ],
            (Mode::Normal, Screen::SetlistDetail { .. }) => vec![
                ("[↑↓]", "Navigate"),
                ("[+]", "Add song"),
                ("[-]", "Remove song"),
                ("[e]", "Edit"),
                ("[Esc]", "Back"),
            ],
            (Mode::Normal, Screen::Songs { .. }) => vec![
                ("[↑↓]", "Navigate"),
                ("[+]", "New"),
                ("[e]", "Edit"),
                ("[-]", "Delete"),
                ("[Tab]", "Setlists"),
            ],
            _ => vec![("[Tab]", "Next field"), ("[Enter]", "Save"), ("[Esc]", "Cancel")],
        };
        if matches!(self.mode, Mode::Normal) {
            keys.push(("[r]", "Reload"));
            if self.client.is_authenticated() {
                keys.push(("[o]", "Sign out"));
            } else {
                keys.push(("[i/u]", "Sign in/up"));
            }
            keys.push(("[q]", "Quit"));
        }

        let mut spans = Vec::with_capacity(keys.len() * 2);
        for (key, label) in keys {
            spans.push(Span::styled(key.to_string(), key_style));
            spans.push(Span::raw(format!(" {label}   ")));
        }
        Line::from(spans)
    }

    fn draw_setlist_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &SetlistForm) {
        let lines: Vec<Line> = SetlistField::ALL
            .iter()
            .map(|field| form.build_line(*field))
            .collect();
        let active = SetlistField::ALL
            .iter()
            .position(|field| *field == form.active)
            .unwrap_or(0);
        let cursor = (
            form.active.label().len() + 2 + form.value(form.active).chars().count(),
            active,
        );
        draw_form_popup(frame, area, title, lines, form.error.as_deref(), cursor);
    }

    fn draw_song_form(&self, frame: &mut Frame, area: Rect, title: &str, form: &SongForm) {
        let lines: Vec<Line> = SongField::ALL
            .iter()
            .map(|field| form.build_line(*field))
            .collect();
        let active = SongField::ALL
            .iter()
            .position(|field| *field == form.active)
            .unwrap_or(0);
        let cursor = (
            form.active.label().len() + 2 + form.value(form.active).chars().count(),
            active,
        );
        draw_form_popup(frame, area, title, lines, form.error.as_deref(), cursor);
    }

    fn draw_auth_form(&self, frame: &mut Frame, area: Rect, form: &AuthForm) {
        let lines = vec![
            form.build_line(AuthField::Email),
            form.build_line(AuthField::Password),
        ];
        let cursor = match form.active {
            AuthField::Email => ("Email: ".len() + form.email.chars().count(), 0),
            AuthField::Password => ("Password: ".len() + form.password.chars().count(), 1),
        };
        draw_form_popup(frame, area, form.intent.title(), lines, form.error.as_deref(), cursor);
    }

    fn draw_song_picker(&self, frame: &mut Frame, area: Rect, picker: &SongPicker) {
        let popup_area = centered_rect(70, 60, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Add Song to Setlist")
            .borders(Borders::ALL);
        let items: Vec<ListItem> = picker
            .candidates
            .iter()
            .enumerate()
            .map(|(idx, song)| ListItem::new(song_line("", song, idx == picker.selected)))
            .collect();
        render_list(frame, popup_area, items, block, picker.selected);
    }

    fn draw_confirm_delete(&self, frame: &mut Frame, area: Rect, confirm: &ConfirmDelete) {
        let popup_area = centered_rect(60, 30, area);
        frame.render_widget(Clear, popup_area);

        let block = Block::default()
            .title("Confirm Removal")
            .borders(Borders::ALL);
        frame.render_widget(block.clone(), popup_area);
        let inner = block.inner(popup_area);

        let (question, consequence) = confirm.prompt();
        let lines = vec![
            Line::from(question),
            Line::from(consequence),
            Line::from(""),
            Line::from(Span::styled(
                "Press Y to confirm or N / Esc to cancel.",
                Style::default().fg(Color::Gray),
            )),
        ];

        let paragraph = Paragraph::new(lines)
            .alignment(Alignment::Left)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, inner);
    }

    fn set_status<S: Into<String>>(&mut self, text: S, kind: StatusKind) {
        self.status = Some(StatusMessage {
            text: text.into(),
            kind,
        });
    }

    fn clear_status(&mut self) {
        self.status = None;
    }

    async fn reload(&mut self) {
        let report = self.store.load_all_data().await;
        self.clamp_selections();
        match report.error {
            Some(message) => self.set_status(message, StatusKind::Error),
            None => self.set_status(
                format!(
                    "Loaded {} setlists and {} songs.",
                    report.setlists, report.songs
                ),
                StatusKind::Info,
            ),
        }
    }

    async fn save_new_setlist(&mut self, form: &SetlistForm) -> Result<()> {
        let data = form.parse_new()?;
        let name = match self.store.create_setlist(data).await? {
            Some(setlist) => setlist.name,
            None => {
                debug!("created setlist not echoed; reloading");
                self.store.fetch_setlists().await?;
                form.name.trim().to_string()
            }
        };
        self.selected = 0;
        self.set_status(format!("Created setlist \"{name}\"."), StatusKind::Info);
        Ok(())
    }

    async fn save_existing_setlist(&mut self, id: SetlistId, form: &SetlistForm) -> Result<()> {
        let patch = form.parse_patch()?;
        let outcome = self.store.update_setlist(id, &patch).await?;
        if outcome == CachePatch::NotCached {
            debug!(id, "setlist updated outside the cache; reloading");
            self.store.fetch_setlists().await?;
        }
        self.set_status("Setlist updated.", StatusKind::Info);
        Ok(())
    }

    async fn save_new_song(&mut self, form: &SongForm) -> Result<()> {
        let data = form.parse_new()?;
        let title = match self.store.create_song(data).await? {
            Some(song) => song.title,
            None => {
                debug!("created song not echoed; reloading");
                self.store.fetch_songs().await?;
                form.title.trim().to_string()
            }
        };
        if let Screen::Songs { ref mut selected } = self.screen {
            *selected = self.store.songs_count().saturating_sub(1);
        }
        self.set_status(format!("Added \"{title}\" to the catalog."), StatusKind::Info);
        Ok(())
    }

    async fn save_existing_song(&mut self, id: i64, form: &SongForm) -> Result<()> {
        let patch = form.parse_patch()?;
        let outcome = self.store.update_song(id, &patch).await?;
        if outcome == CachePatch::NotCached {
            debug!(id, "song updated outside the cache; reloading");
            self.store.fetch_songs().await?;
        }
        self.set_status("Song updated.", StatusKind::Info);
        Ok(())
    }

    async fn perform_delete(&mut self, confirm: &ConfirmDelete) -> Result<()> {
        match confirm {
            ConfirmDelete::Setlist { id, name } => {
                self.store.delete_setlist(*id).await?;
                if matches!(self.screen, Screen::SetlistDetail { setlist_id, .. } if setlist_id == *id)
                {
                    self.screen = Screen::Setlists;
                }
                self.set_status(format!("Deleted setlist \"{name}\"."), StatusKind::Info);
            }
            ConfirmDelete::Song { id, title } => {
                self.store.delete_song(*id).await?;
                self.set_status(format!("Deleted \"{title}\"."), StatusKind::Info);
            }
            ConfirmDelete::SetlistEntry {
                setlist_id,
                song_id,
                title,
            } => {
                self.store
                    .remove_song_from_setlist(*setlist_id, *song_id)
                    .await?;
                self.set_status(format!("Removed \"{title}\"."), StatusKind::Info);
            }
        }
        self.clamp_selections();
        Ok(())
    }

    fn open_auth(&self, intent: AuthIntent) -> Mode {
        Mode::Authenticating(AuthForm::new(intent))
    }

    async fn authenticate(&mut self, form: &AuthForm) -> Result<()> {
        let (email, password) = form.parse_inputs()?;
        match form.intent {
            AuthIntent::SignIn => {
                self.client.sign_in(&email, &password).await?;
                self.reload().await;
                self.set_status(format!("Signed in as {email}."), StatusKind::Info);
            }
            AuthIntent::SignUp => {
                let response = self.client.sign_up(&email, &password).await?;
                if response.session.is_some() {
                    self.reload().await;
                    self.set_status(format!("Signed up as {email}."), StatusKind::Info);
                } else {
                    self.set_status(
                        "Check your inbox to confirm the account, then sign in.",
                        StatusKind::Info,
                    );
                }
            }
        }
        Ok(())
    }

    async fn sign_out(&mut self) {
        if !self.client.is_authenticated() {
            self.set_status("Not signed in.", StatusKind::Info);
            return;
        }
        self.client.sign_out().await;
        match self.client.last_error() {
            Some(message) => self.set_status(message, StatusKind::Error),
            None => self.set_status("Signed out.", StatusKind::Info),
        }
    }

    fn current_setlist(&self) -> Option<&Setlist> {
        self.store.setlists().get(self.selected)
    }

    fn move_setlist_selection(&mut self, offset: isize) {
        self.selected = step(self.selected, self.store.setlists_count(), offset);
    }

    fn clamp_selections(&mut self) {
        self.selected = step(self.selected, self.store.setlists_count(), 0);
        let songs = self.store.songs_count();
        match self.screen {
            Screen::Songs { ref mut selected } => *selected = step(*selected, songs, 0),
            Screen::SetlistDetail {
                setlist_id,
                ref mut selected,
            } => {
                let len = self
                    .store
                    .find_setlist(setlist_id)
                    .map(|setlist| setlist_songs(setlist).len())
                    .unwrap_or(0);
                *selected = step(*selected, len, 0);
            }
            Screen::Setlists => {}
        }
    }
}

/// Catalog songs that are not yet linked to `setlist`, with the position the
/// next one should take.
fn song_picker(setlist: &Setlist, catalog: &[Song]) -> SongPicker {
    let entries = setlist.setlist_songs.as_deref().unwrap_or_default();
    let linked: HashSet<i64> = entries.iter().map(|entry| entry.song_id).collect();
    let next_position = entries
        .iter()
        .filter_map(|entry| entry.position)
        .max()
        .unwrap_or(0)
        + 1;
    let candidates = catalog
        .iter()
        .filter(|song| !linked.contains(&song.id))
        .cloned()
        .collect();
    SongPicker::new(setlist.id, candidates, next_position)
}

fn render_list(frame: &mut Frame, area: Rect, items: Vec<ListItem>, block: Block, selected: usize) {
    let list = List::new(items)
        .block(block)
        .highlight_symbol("> ")
        .highlight_style(Style::default().fg(Color::Yellow));
    let mut state = ListState::default().with_selected(Some(selected));
    frame.render_stateful_widget(list, area, &mut state);
}

/// Modal with one line per field, then the error or the key hints. `cursor`
/// is the column within the field line and the field's row.
fn draw_form_popup(
    frame: &mut Frame,
    area: Rect,
    title: &str,
    mut lines: Vec<Line<'static>>,
    error: Option<&str>,
    cursor: (usize, usize),
) {
    let popup_area = centered_rect(70, 60, area);
    frame.render_widget(Clear, popup_area);

    let block = Block::default().title(title.to_string()).borders(Borders::ALL);
    frame.render_widget(block.clone(), popup_area);
    let inner = block.inner(popup_area);

    lines.push(Line::from(""));
    match error {
        Some(error) => lines.push(Line::from(Span::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        ))),
        None => lines.push(Line::from(Span::styled(
            "Enter to save · Tab to switch · Esc to cancel",
            Style::default().fg(Color::Gray),
        ))),
    }

    frame.render_widget(Paragraph::new(lines), inner);
    frame.set_cursor_position((inner.x + cursor.0 as u16, inner.y + cursor.1 as u16));
}
