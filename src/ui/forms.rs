use anyhow::{anyhow, Context, Result};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};

use crate::models::{NewSetlist, NewSong, Setlist, SetlistId, SetlistPatch, Song, SongId, SongPatch};

/// Fields of the setlist form, in tab order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum SetlistField {
    #[default]
    Name,
    Venue,
    Date,
    Description,
}

impl SetlistField {
    pub(crate) const ALL: [SetlistField; 4] = [
        SetlistField::Name,
        SetlistField::Venue,
        SetlistField::Date,
        SetlistField::Description,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            SetlistField::Name => "Name",
            SetlistField::Venue => "Venue",
            SetlistField::Date => "Date",
            SetlistField::Description => "Description",
        }
    }

    fn required(self) -> bool {
        !matches!(self, SetlistField::Description)
    }
}

#[derive(Default, Clone)]
pub(crate) struct SetlistForm {
    pub(crate) name: String,
    pub(crate) venue: String,
    pub(crate) date: String,
    pub(crate) description: String,
    pub(crate) active: SetlistField,
    pub(crate) error: Option<String>,
}

impl SetlistForm {
    pub(crate) fn from_setlist(setlist: &Setlist) -> Self {
        Self {
            name: setlist.name.clone(),
            venue: setlist.venue.clone(),
            date: setlist.date.clone(),
            description: setlist.description.clone().unwrap_or_default(),
            active: SetlistField::Name,
            error: None,
        }
    }

    pub(crate) fn next_field(&mut self) {
        self.active = cycle(&SetlistField::ALL, self.active, 1);
    }

    pub(crate) fn prev_field(&mut self) {
        self.active = cycle(&SetlistField::ALL, self.active, -1);
    }

    pub(crate) fn value(&self, field: SetlistField) -> &str {
        match field {
            SetlistField::Name => &self.name,
            SetlistField::Venue => &self.venue,
            SetlistField::Date => &self.date,
            SetlistField::Description => &self.description,
        }
    }

    fn value_mut(&mut self, field: SetlistField) -> &mut String {
        match field {
            SetlistField::Name => &mut self.name,
            SetlistField::Venue => &mut self.venue,
            SetlistField::Date => &mut self.date,
            SetlistField::Description => &mut self.description,
        }
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() {
            return false;
        }
        self.value_mut(self.active).push(ch);
        true
    }

    pub(crate) fn backspace(&mut self) {
        self.value_mut(self.active).pop();
    }

    /// Validate the inputs for a new setlist.
    pub(crate) fn parse_new(&self) -> Result<NewSetlist> {
        for field in SetlistField::ALL {
            if field.required() && self.value(field).trim().is_empty() {
                return Err(anyhow!("{} is required.", field.label()));
            }
        }
        Ok(NewSetlist {
            name: self.name.trim().to_string(),
            venue: self.venue.trim().to_string(),
            date: self.date.trim().to_string(),
            description: Some(self.description.trim().to_string()),
        })
    }

    /// Same validation as [`parse_new`](Self::parse_new), shaped as a patch.
    /// Every field is sent, so a blanked description clears the column.
    pub(crate) fn parse_patch(&self) -> Result<SetlistPatch> {
        let new = self.parse_new()?.normalized();
        Ok(SetlistPatch {
            name: Some(new.name),
            venue: Some(new.venue),
            date: Some(new.date),
            description: Some(new.description),
        })
    }

    pub(crate) fn build_line(&self, field: SetlistField) -> Line<'static> {
        field_line(
            field.label(),
            self.value(field),
            self.active == field,
            field.required(),
            false,
        )
    }
}

/// Fields of the song form, in tab order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum SongField {
    #[default]
    Title,
    Artist,
    Duration,
    Key,
    Bpm,
    Genre,
    Notes,
}

impl SongField {
    pub(crate) const ALL: [SongField; 7] = [
        SongField::Title,
        SongField::Artist,
        SongField::Duration,
        SongField::Key,
        SongField::Bpm,
        SongField::Genre,
        SongField::Notes,
    ];

    pub(crate) fn label(self) -> &'static str {
        match self {
            SongField::Title => "Title",
            SongField::Artist => "Artist",
            SongField::Duration => "Duration",
            SongField::Key => "Key",
            SongField::Bpm => "BPM",
            SongField::Genre => "Genre",
            SongField::Notes => "Notes",
        }
    }

    fn required(self) -> bool {
        matches!(
            self,
            SongField::Title | SongField::Artist | SongField::Duration | SongField::Key
        )
    }
}

#[derive(Default, Clone)]
pub(crate) struct SongForm {
    pub(crate) title: String,
    pub(crate) artist: String,
    pub(crate) duration: String,
    pub(crate) key: String,
    pub(crate) bpm: String,
    pub(crate) genre: String,
    pub(crate) notes: String,
    pub(crate) active: SongField,
    pub(crate) error: Option<String>,
}

impl SongForm {
    pub(crate) fn from_song(song: &Song) -> Self {
        Self {
            title: song.title.clone(),
            artist: song.artist.clone(),
            duration: song.duration.clone(),
            key: song.key.clone(),
            bpm: song.bpm.map(|bpm| bpm.to_string()).unwrap_or_default(),
            genre: song.genre.clone().unwrap_or_default(),
            notes: song.notes.clone().unwrap_or_default(),
            active: SongField::Title,
            error: None,
        }
    }

    pub(crate) fn next_field(&mut self) {
        self.active = cycle(&SongField::ALL, self.active, 1);
    }

    pub(crate) fn prev_field(&mut self) {
        self.active = cycle(&SongField::ALL, self.active, -1);
    }

    pub(crate) fn value(&self, field: SongField) -> &str {
        match field {
            SongField::Title => &self.title,
            SongField::Artist => &self.artist,
            SongField::Duration => &self.duration,
            SongField::Key => &self.key,
            SongField::Bpm => &self.bpm,
            SongField::Genre => &self.genre,
            SongField::Notes => &self.notes,
        }
    }

    fn value_mut(&mut self, field: SongField) -> &mut String {
        match field {
            SongField::Title => &mut self.title,
            SongField::Artist => &mut self.artist,
            SongField::Duration => &mut self.duration,
            SongField::Key => &mut self.key,
            SongField::Bpm => &mut self.bpm,
            SongField::Genre => &mut self.genre,
            SongField::Notes => &mut self.notes,
        }
    }

    /// Append a character to the active field. BPM only takes digits.
    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        let accepted = match self.active {
            SongField::Bpm => ch.is_ascii_digit(),
            _ => !ch.is_control(),
        };
        if accepted {
            self.value_mut(self.active).push(ch);
        }
        accepted
    }

    pub(crate) fn backspace(&mut self) {
        self.value_mut(self.active).pop();
    }

    pub(crate) fn parse_new(&self) -> Result<NewSong> {
        for field in SongField::ALL {
            if field.required() && self.value(field).trim().is_empty() {
                return Err(anyhow!("{} is required.", field.label()));
            }
        }
        let bpm_raw = self.bpm.trim();
        let bpm = if bpm_raw.is_empty() {
            None
        } else {
            Some(bpm_raw.parse::<i64>().context("BPM must be a whole number.")?)
        };

        Ok(NewSong {
            title: self.title.trim().to_string(),
            artist: self.artist.trim().to_string(),
            duration: self.duration.trim().to_string(),
            key: self.key.trim().to_string(),
            bpm,
            genre: Some(self.genre.trim().to_string()),
            notes: Some(self.notes.trim().to_string()),
        })
    }

    pub(crate) fn parse_patch(&self) -> Result<SongPatch> {
        let new = self.parse_new()?.normalized();
        Ok(SongPatch {
            title: Some(new.title),
            artist: Some(new.artist),
            duration: Some(new.duration),
            key: Some(new.key),
            bpm: Some(new.bpm),
            genre: Some(new.genre),
            notes: Some(new.notes),
        })
    }

    pub(crate) fn build_line(&self, field: SongField) -> Line<'static> {
        field_line(
            field.label(),
            self.value(field),
            self.active == field,
            field.required(),
            false,
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AuthIntent {
    SignIn,
    SignUp,
}

impl AuthIntent {
    pub(crate) fn title(self) -> &'static str {
        match self {
            AuthIntent::SignIn => "Sign In",
            AuthIntent::SignUp => "Sign Up",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) enum AuthField {
    #[default]
    Email,
    Password,
}

#[derive(Clone)]
pub(crate) struct AuthForm {
    pub(crate) intent: AuthIntent,
    pub(crate) email: String,
    pub(crate) password: String,
    pub(crate) active: AuthField,
    pub(crate) error: Option<String>,
}

impl AuthForm {
    pub(crate) fn new(intent: AuthIntent) -> Self {
        Self {
            intent,
            email: String::new(),
            password: String::new(),
            active: AuthField::Email,
            error: None,
        }
    }

    /// Flip between sign-in and sign-up, keeping what was typed.
    pub(crate) fn toggle_intent(&mut self) {
        self.intent = match self.intent {
            AuthIntent::SignIn => AuthIntent::SignUp,
            AuthIntent::SignUp => AuthIntent::SignIn,
        };
        self.error = None;
    }

    pub(crate) fn toggle_field(&mut self) {
        self.active = match self.active {
            AuthField::Email => AuthField::Password,
            AuthField::Password => AuthField::Email,
        };
    }

    pub(crate) fn push_char(&mut self, ch: char) -> bool {
        if ch.is_control() || (self.active == AuthField::Email && ch.is_whitespace()) {
            return false;
        }
        match self.active {
            AuthField::Email => self.email.push(ch),
            AuthField::Password => self.password.push(ch),
        }
        true
    }

    pub(crate) fn backspace(&mut self) {
        match self.active {
            AuthField::Email => {
                self.email.pop();
            }
            AuthField::Password => {
                self.password.pop();
            }
        }
    }

    /// Both fields present. Format and strength checks are left to the backend
    /// so its messages reach the user unchanged.
    pub(crate) fn parse_inputs(&self) -> Result<(String, String)> {
        let email = self.email.trim();
        if email.is_empty() {
            return Err(anyhow!("Email is required."));
        }
        if self.password.is_empty() {
            return Err(anyhow!("Password is required."));
        }
        Ok((email.to_string(), self.password.clone()))
    }

    pub(crate) fn build_line(&self, field: AuthField) -> Line<'static> {
        match field {
            AuthField::Email => {
                field_line("Email", &self.email, self.active == field, true, false)
            }
            AuthField::Password => {
                field_line("Password", &self.password, self.active == field, true, true)
            }
        }
    }
}

/// What a pending deletion would remove.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ConfirmDelete {
    Setlist {
        id: SetlistId,
        name: String,
    },
    Song {
        id: SongId,
        title: String,
    },
    SetlistEntry {
        setlist_id: SetlistId,
        song_id: SongId,
        title: String,
    },
}

impl ConfirmDelete {
    pub(crate) fn from_setlist(setlist: &Setlist) -> Self {
        ConfirmDelete::Setlist {
            id: setlist.id,
            name: setlist.name.clone(),
        }
    }

    pub(crate) fn from_song(song: &Song) -> Self {
        ConfirmDelete::Song {
            id: song.id,
            title: song.title.clone(),
        }
    }

    pub(crate) fn prompt(&self) -> (String, &'static str) {
        match self {
            ConfirmDelete::Setlist { name, .. } => (
                format!("Delete setlist \"{name}\"?"),
                "Its song links are removed too.",
            ),
            ConfirmDelete::Song { title, .. } => (
                format!("Delete \"{title}\" from the catalog?"),
                "It is also taken out of every setlist.",
            ),
            ConfirmDelete::SetlistEntry { title, .. } => (
                format!("Remove \"{title}\" from this setlist?"),
                "The song stays in the catalog.",
            ),
        }
    }
}

/// Catalog songs not yet in a setlist, offered for adding.
pub(crate) struct SongPicker {
    pub(crate) setlist_id: SetlistId,
    pub(crate) candidates: Vec<Song>,
    pub(crate) selected: usize,
    pub(crate) next_position: i64,
}

impl SongPicker {
    pub(crate) fn new(setlist_id: SetlistId, candidates: Vec<Song>, next_position: i64) -> Self {
        Self {
            setlist_id,
            candidates,
            selected: 0,
            next_position,
        }
    }

    pub(crate) fn move_selection(&mut self, offset: isize) {
        self.selected = step(self.selected, self.candidates.len(), offset);
    }

    pub(crate) fn current(&self) -> Option<&Song> {
        self.candidates.get(self.selected)
    }
}

/// Move `index` by `offset` within `0..len`, clamping at both ends.
pub(crate) fn step(index: usize, len: usize, offset: isize) -> usize {
    if len == 0 {
        return 0;
    }
    let target = index as isize + offset;
    target.clamp(0, len as isize - 1) as usize
}

fn cycle<T: Copy + PartialEq>(all: &[T], current: T, offset: isize) -> T {
    let len = all.len() as isize;
    let index = all.iter().position(|item| *item == current).unwrap_or(0) as isize;
    all[(index + offset).rem_euclid(len) as usize]
}

fn field_line(
    name: &str,
    value: &str,
    is_active: bool,
    required: bool,
    masked: bool,
) -> Line<'static> {
    let display = if value.is_empty() {
        let placeholder = if required { "<required>" } else { "<optional>" };
        placeholder.to_string()
    } else if masked {
        "*".repeat(value.chars().count())
    } else {
        value.to_string()
    };

    let style = if is_active {
        Style::default().fg(Color::Yellow)
    } else if value.is_empty() {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };

    Line::from(vec![
        Span::raw(format!("{name}: ")),
        Span::styled(display, style),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setlist_form_requires_name_venue_and_date() {
        let mut form = SetlistForm::default();
        for ch in "Summer Tour".chars() {
            form.push_char(ch);
        }
        let err = form.parse_new().unwrap_err();
        assert_eq!(err.to_string(), "Venue is required.");

        form.next_field();
        "Arena".chars().for_each(|ch| {
            form.push_char(ch);
        });
        form.next_field();
        "2024-06-01".chars().for_each(|ch| {
            form.push_char(ch);
        });

        let parsed = form.parse_new().unwrap().normalized();
        assert_eq!(parsed.venue, "Arena");
        assert_eq!(parsed.description, None);
    }

    #[test]
    fn field_focus_wraps_in_both_directions() {
        let mut form = SongForm::default();
        form.prev_field();
        assert_eq!(form.active, SongField::Notes);
        form.next_field();
        assert_eq!(form.active, SongField::Title);
    }

    #[test]
    fn song_form_keeps_bpm_numeric() {
        let mut form = SongForm {
            active: SongField::Bpm,
            ..SongForm::default()
        };
        assert!(form.push_char('1'));
        assert!(!form.push_char('x'));
        assert!(form.push_char('2'));
        assert_eq!(form.bpm, "12");
    }

    #[test]
    fn song_patch_clears_blanked_optionals() {
        let form = SongForm {
            title: "Anthem".into(),
            artist: "Us".into(),
            duration: "4:00".into(),
            key: "D".into(),
            bpm: "0".into(),
            notes: " ".into(),
            ..SongForm::default()
        };
        let patch = form.parse_patch().unwrap();
        assert_eq!(patch.title.as_deref(), Some("Anthem"));
        assert_eq!(patch.bpm, Some(None));
        assert_eq!(patch.genre, Some(None));
        assert_eq!(patch.notes, Some(None));
    }

    #[test]
    fn cleared_description_is_sent_as_null() {
        let setlist = Setlist {
            id: 7,
            name: "Gig".into(),
            venue: "Bar".into(),
            date: "2024-06-01".into(),
            description: Some("warm-up".into()),
            created_at: None,
            setlist_songs: None,
            songs: None,
        };
        let mut form = SetlistForm::from_setlist(&setlist);
        form.description.clear();

        let body = serde_json::to_value(form.parse_patch().unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "name": "Gig",
                "venue": "Bar",
                "date": "2024-06-01",
                "description": null
            })
        );
    }

    #[test]
    fn password_is_masked() {
        let mut form = AuthForm::new(AuthIntent::SignIn);
        form.toggle_field();
        "secret".chars().for_each(|ch| {
            form.push_char(ch);
        });
        let rendered: String = form
            .build_line(AuthField::Password)
            .spans
            .iter()
            .map(|span| span.content.to_string())
            .collect();
        assert_eq!(rendered, "Password: ******");
    }

    #[test]
    fn step_clamps_to_bounds() {
        assert_eq!(step(0, 3, -1), 0);
        assert_eq!(step(1, 3, 5), 2);
        assert_eq!(step(4, 0, 1), 0);
    }
}
