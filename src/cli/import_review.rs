use crossterm::event::KeyCode;
use ratatui::{
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::error::Result;
use crate::fmt::{money, truncate};
use crate::models::ImportRow;
use crate::resolver::name_key;
use crate::review::ReviewState;
use crate::tui::{
    run_screen, wrap_text, Screen, ScreenAction, COLUMN_STYLE, CURSOR_STYLE, ERROR_STYLE,
    FOOTER_STYLE, HEADER_STYLE, NEW_STYLE, STATUS_STYLE,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Focus {
    Rows,
    Parties,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Pending,
    Commit,
    Abort,
}

pub struct ImportReview {
    state: ReviewState,
    file_name: String,
    focus: Focus,
    cursor: usize,
    scroll_offset: usize,
    last_visible_rows: usize,
    party_cursor: usize,
    show_errors: bool,
    status_message: Option<String>,
    status_ttl: u8,
    outcome: Outcome,
}

impl ImportReview {
    pub fn new(state: ReviewState, file_name: &str) -> Self {
        Self {
            state,
            file_name: file_name.to_string(),
            focus: Focus::Rows,
            cursor: 0,
            scroll_offset: 0,
            last_visible_rows: 20,
            party_cursor: 0,
            show_errors: false,
            status_message: None,
            status_ttl: 0,
            outcome: Outcome::Pending,
        }
    }

    fn current_row(&self) -> Option<&ImportRow> {
        self.state.rows().get(self.cursor)
    }

    /// Party the p/m/u keys act on: the highlighted party, or the party of
    /// the highlighted row.
    fn current_party(&self) -> Option<String> {
        match self.focus {
            Focus::Parties => self
                .state
                .approvals()
                .get(self.party_cursor)
                .map(|a| a.name.clone()),
            Focus::Rows => self
                .current_row()
                .filter(|r| r.has_party())
                .map(|r| r.location.clone()),
        }
    }

    fn set_status(&mut self, msg: String) {
        self.status_message = Some(msg);
        self.status_ttl = 3;
    }

    fn apply(&mut self, next: Result<ReviewState>, done: String) {
        match next {
            Ok(state) => {
                self.state = state;
                self.party_cursor = self
                    .party_cursor
                    .min(self.state.approvals().len().saturating_sub(1));
                self.set_status(done);
            }
            Err(e) => self.set_status(e.to_string()),
        }
    }

    fn ensure_visible(&mut self, visible_rows: usize) {
        if self.cursor < self.scroll_offset {
            self.scroll_offset = self.cursor;
        } else if visible_rows > 0 && self.cursor >= self.scroll_offset + visible_rows {
            self.scroll_offset = self.cursor - visible_rows + 1;
        }
    }

    fn merge_current(&mut self) {
        let Some(party) = self.current_party() else {
            self.set_status("No party here".into());
            return;
        };
        let target = self
            .state
            .suggestions()
            .into_iter()
            .find(|s| name_key(&s.name) == name_key(&party))
            .and_then(|s| s.best_target().map(str::to_string));
        match target {
            Some(target) => {
                let next = self.state.merge(&party, &target);
                self.apply(next, format!("Merged '{party}' into '{target}'"));
            }
            None => self.set_status(format!("No similar party for '{party}'")),
        }
    }

    fn undo_current(&mut self) {
        let target = match self.focus {
            Focus::Rows => self
                .current_row()
                .filter(|r| r.original_location.is_some())
                .map(|r| r.location.clone()),
            Focus::Parties => self.current_party(),
        }
        .filter(|t| {
            self.state
                .ledger()
                .entries()
                .iter()
                .any(|e| name_key(&e.target) == name_key(t))
        })
        .or_else(|| self.state.ledger().entries().last().map(|e| e.target.clone()));

        match target {
            Some(target) => {
                let next = self.state.undo_merge(&target);
                self.apply(next, format!("Undid merges into '{target}'"));
            }
            None => self.set_status("Nothing to undo".into()),
        }
    }

    fn row_line(&self, i: usize, row: &ImportRow) -> Line<'static> {
        let marker = if i == self.cursor && self.focus == Focus::Rows { ">" } else { " " };
        let check = if row.selected { "[x]" } else { "[ ]" };
        let party = match &row.original_location {
            Some(orig) => format!("{} \u{2190} {}", row.location, orig),
            None => row.location.clone(),
        };
        let total = row.total.map(money).unwrap_or_else(|| row.total_raw.clone());
        let mut spans = vec![Span::raw(format!(
            "{marker}{check} {:>4}  {:<16} {:<10} {:<22} {:<18} {:>12}  ",
            row.row_number,
            truncate(&row.expense_type, 16),
            truncate(row.date_iso.as_deref().unwrap_or(&row.date_raw), 10),
            truncate(&party, 22),
            truncate(&row.item_type, 18),
            truncate(&total, 12),
        ))];
        if row.is_new_category || row.is_new_party {
            let what = match (row.is_new_category, row.is_new_party) {
                (true, true) => "new cat+party",
                (true, false) => "new category",
                _ => "new party",
            };
            spans.push(Span::styled(format!("{what} "), NEW_STYLE));
        }
        if let Some(err) = row.first_error() {
            spans.push(Span::styled(err, ERROR_STYLE));
        }
        let line = Line::from(spans);
        if i == self.cursor && self.focus == Focus::Rows {
            line.style(CURSOR_STYLE)
        } else if !row.is_valid {
            line.style(Style::default().fg(Color::DarkGray))
        } else {
            line
        }
    }

    fn party_lines(&self) -> Vec<Line<'static>> {
        let mut lines = vec![Line::from(Span::styled(
            format!(" New parties ({})", self.state.approvals().len()),
            Style::default().add_modifier(Modifier::BOLD),
        ))];
        let suggestions = self.state.suggestions();
        for (i, a) in self.state.approvals().iter().enumerate() {
            let marker = if i == self.party_cursor && self.focus == Focus::Parties { ">" } else { " " };
            let check = if a.approved { "[x]" } else { "[ ]" };
            let hint = suggestions
                .iter()
                .find(|s| name_key(&s.name) == name_key(&a.name))
                .and_then(|s| s.best_target())
                .map(|t| format!("  similar: {t}"))
                .unwrap_or_default();
            let line = Line::from(vec![
                Span::raw(format!("{marker}{check} {}", a.name)),
                Span::styled(hint, FOOTER_STYLE),
            ]);
            lines.push(if marker == ">" { line.style(CURSOR_STYLE) } else { line });
        }
        for entry in self.state.ledger().entries() {
            lines.push(Line::from(Span::styled(
                format!(
                    "   merged {} \u{2192} {} ({} rows)",
                    entry.source,
                    entry.target,
                    entry.row_count()
                ),
                FOOTER_STYLE,
            )));
        }
        lines
    }
}

impl Screen for ImportReview {
    fn draw(&mut self, frame: &mut Frame) {
        let area = frame.area();
        let border_style = Style::default().fg(Color::DarkGray);
        let party_lines = self.party_lines();
        let party_height = (party_lines.len() as u16).min(area.height / 3).max(1);

        let error_text = if self.show_errors {
            self.current_row()
                .map(|r| {
                    if r.errors.is_empty() {
                        format!("Row {}: no errors", r.row_number)
                    } else {
                        let all: Vec<String> = r.errors.iter().map(|e| e.to_string()).collect();
                        format!("Row {}: {}", r.row_number, all.join("; "))
                    }
                })
                .unwrap_or_default()
        } else {
            String::new()
        };
        let (error_text, error_height) = wrap_text(&error_text, area.width.saturating_sub(2) as usize);
        let error_height = if self.show_errors { error_height } else { 0 };

        let [header_area, sep, column_area, rows_area, parties_area, errors_area, hints_area] =
            Layout::vertical([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Fill(1),
                Constraint::Length(party_height),
                Constraint::Length(error_height),
                Constraint::Length(1),
            ])
            .areas(area);

        let valid = self.state.rows().iter().filter(|r| r.is_valid).count();
        frame.render_widget(
            Paragraph::new(format!(
                " {}  \u{2502}  {} rows, {} valid, {} selected",
                self.file_name,
                self.state.rows().len(),
                valid,
                self.state.selected_count()
            ))
            .style(HEADER_STYLE),
            header_area,
        );
        let sep_line = "\u{2501}".repeat(area.width as usize);
        frame.render_widget(Paragraph::new(sep_line.as_str()).style(border_style), sep);
        frame.render_widget(
            Paragraph::new(format!(
                "     {:>4}  {:<16} {:<10} {:<22} {:<18} {:>12}  {}",
                "Row", "Expense", "Date", "Party", "Item", "Total", "Notes"
            ))
            .style(COLUMN_STYLE),
            column_area,
        );

        let data_rows = rows_area.height as usize;
        self.last_visible_rows = data_rows;
        self.ensure_visible(data_rows);
        let end = (self.scroll_offset + data_rows).min(self.state.rows().len());
        let lines: Vec<Line> = (self.scroll_offset..end)
            .map(|i| self.row_line(i, &self.state.rows()[i]))
            .collect();
        frame.render_widget(Paragraph::new(lines), rows_area);

        frame.render_widget(Paragraph::new(party_lines), parties_area);
        if self.show_errors {
            frame.render_widget(Paragraph::new(format!(" {error_text}")).style(ERROR_STYLE), errors_area);
        }

        if let Some(msg) = &self.status_message {
            frame.render_widget(Paragraph::new(format!(" {msg}")).style(STATUS_STYLE), hints_area);
        } else {
            frame.render_widget(
                Paragraph::new(
                    " space=toggle  a/n=all/none  p=party  A/R=approve/reject all  m=merge  u=undo  e=errors  Tab=focus  c=commit  Esc=abort",
                )
                .style(FOOTER_STYLE),
                hints_area,
            );
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> ScreenAction {
        if self.status_ttl > 0 {
            self.status_ttl -= 1;
            if self.status_ttl == 0 {
                self.status_message = None;
            }
        }

        match code {
            KeyCode::Up => match self.focus {
                Focus::Rows => {
                    self.cursor = self.cursor.saturating_sub(1);
                    self.ensure_visible(self.last_visible_rows);
                }
                Focus::Parties => self.party_cursor = self.party_cursor.saturating_sub(1),
            },
            KeyCode::Down => match self.focus {
                Focus::Rows => {
                    if !self.state.rows().is_empty() {
                        self.cursor = (self.cursor + 1).min(self.state.rows().len() - 1);
                        self.ensure_visible(self.last_visible_rows);
                    }
                }
                Focus::Parties => {
                    if !self.state.approvals().is_empty() {
                        self.party_cursor = (self.party_cursor + 1).min(self.state.approvals().len() - 1);
                    }
                }
            },
            KeyCode::Tab => {
                self.focus = match self.focus {
                    Focus::Rows if !self.state.approvals().is_empty() => Focus::Parties,
                    _ => Focus::Rows,
                };
            }
            KeyCode::Char(' ') => {
                if let Some(row) = self.current_row() {
                    let n = row.row_number;
                    let next = self.state.toggle_row(n);
                    let selected = next.as_ref().ok().and_then(|s| s.row(n)).is_some_and(|r| r.selected);
                    let msg = if selected {
                        format!("Row {n} selected")
                    } else {
                        format!("Row {n} not selected")
                    };
                    self.apply(next, msg);
                }
            }
            KeyCode::Char('a') => {
                self.state = self.state.select_all();
                self.set_status(format!("{} rows selected", self.state.selected_count()));
            }
            KeyCode::Char('n') => {
                self.state = self.state.deselect_all();
                self.set_status("All rows deselected".into());
            }
            KeyCode::Char('p') => match self.current_party() {
                Some(party) if self.state.approval(&party).is_some() => {
                    let next = self.state.toggle_party(&party);
                    self.apply(next, format!("Toggled approval for '{party}'"));
                }
                _ => self.set_status("Not a new party".into()),
            },
            KeyCode::Char('A') => {
                self.state = self.state.approve_all();
                self.set_status("All new parties approved".into());
            }
            KeyCode::Char('R') => {
                self.state = self.state.reject_all();
                self.set_status("All new parties rejected".into());
            }
            KeyCode::Char('m') => self.merge_current(),
            KeyCode::Char('u') => self.undo_current(),
            KeyCode::Char('e') => self.show_errors = !self.show_errors,
            KeyCode::Char('c') => {
                self.outcome = Outcome::Commit;
                return ScreenAction::Close;
            }
            KeyCode::Esc | KeyCode::Char('q') => {
                self.outcome = Outcome::Abort;
                return ScreenAction::Close;
            }
            _ => {}
        }
        ScreenAction::Continue
    }

    fn interrupt(&mut self) {
        self.outcome = Outcome::Abort;
    }
}

/// Show the review screen. Returns the reviewed state when the operator
/// commits, `None` when they abort.
pub fn run(state: ReviewState, file_name: &str) -> Result<Option<ReviewState>> {
    let mut screen = ImportReview::new(state, file_name);
    run_screen(&mut screen)?;
    Ok(match screen.outcome {
        Outcome::Commit => Some(screen.state),
        Outcome::Pending | Outcome::Abort => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::{build_preview, SourceKind};
    use crate::resolver::KnownEntities;

    fn review(text: &str) -> ImportReview {
        let known = KnownEntities::new(&["Fuel".to_string()], &["Shell".to_string()]);
        let preview = build_preview("paste", text, SourceKind::Pasted, &known, &[]).unwrap();
        ImportReview::new(ReviewState::new(&preview, known), "paste")
    }

    const TEXT: &str = "Fuel\t2024-03-01\tShell Express\tDiesel\t\t\t50\n\
                        Fuel\tbad\tShell\tDiesel\t\t\t20\n";

    #[test]
    fn test_space_toggles_row_under_cursor() {
        let mut r = review(TEXT);
        assert_eq!(r.state.selected_count(), 1);
        r.handle_key(KeyCode::Char(' '));
        assert_eq!(r.state.selected_count(), 0);
        // invalid row cannot be selected
        r.handle_key(KeyCode::Down);
        r.handle_key(KeyCode::Char(' '));
        assert_eq!(r.state.selected_count(), 0);
    }

    #[test]
    fn test_merge_and_undo_keys() {
        let mut r = review(TEXT);
        r.handle_key(KeyCode::Char('m'));
        assert_eq!(r.state.rows()[0].location, "Shell");
        assert!(!r.state.rows()[0].is_new_party);
        r.handle_key(KeyCode::Char('u'));
        assert_eq!(r.state.rows()[0].location, "Shell Express");
        assert!(r.state.ledger().is_empty());
    }

    #[test]
    fn test_merge_key_matches_non_ascii_spelling() {
        let known = KnownEntities::new(&["Fuel".to_string()], &["Şell".to_string()]);
        let text = "Fuel\t2024-03-01\tŞELL EXPRESS\tMazot\t\t\t50\n\
                    Fuel\t2024-03-02\tşell express\tMazot\t\t\t60\n";
        let preview = build_preview("paste", text, SourceKind::Pasted, &known, &[]).unwrap();
        let mut r = ImportReview::new(ReviewState::new(&preview, known), "paste");

        r.handle_key(KeyCode::Down);
        r.handle_key(KeyCode::Char('m'));
        assert_eq!(r.state.rows()[1].location, "Şell");
        assert_eq!(r.state.rows()[0].location, "Şell");
        r.handle_key(KeyCode::Char('u'));
        assert_eq!(r.state.rows()[1].location, "şell express");
        assert!(r.state.ledger().is_empty());
    }

    #[test]
    fn test_party_key_rejects_new_party() {
        let mut r = review(TEXT);
        r.handle_key(KeyCode::Char('p'));
        assert_eq!(r.state.approval("Shell Express"), Some(false));
        assert_eq!(r.state.selected_count(), 0);
        r.handle_key(KeyCode::Char('A'));
        assert_eq!(r.state.selected_count(), 1);
    }

    #[test]
    fn test_commit_and_abort_outcomes() {
        let mut r = review(TEXT);
        assert!(matches!(r.handle_key(KeyCode::Char('c')), ScreenAction::Close));
        assert_eq!(r.outcome, Outcome::Commit);

        let mut r = review(TEXT);
        assert!(matches!(r.handle_key(KeyCode::Esc), ScreenAction::Close));
        assert_eq!(r.outcome, Outcome::Abort);
    }

    #[test]
    fn test_failed_operation_sets_status() {
        let mut r = review(TEXT);
        r.handle_key(KeyCode::Down);
        r.handle_key(KeyCode::Char('u'));
        assert_eq!(r.status_message.as_deref(), Some("Nothing to undo"));
    }
}
