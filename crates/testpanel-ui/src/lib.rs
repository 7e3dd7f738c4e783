use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};

use testpanel_core::{
    PanelCommand, PanelHandle, PanelPhase, PanelRow, PanelSnapshot, RowAction, RowSync,
};

const PANEL_TITLE: &str = "Test Management Panel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    Quit,
    MoveUp,
    MoveDown,
    Toggle,
    Refresh,
    Retry,
}

pub fn action_for_key(key: KeyEvent) -> Option<UiAction> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(UiAction::Quit);
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => Some(UiAction::Quit),
        KeyCode::Up | KeyCode::Char('k') => Some(UiAction::MoveUp),
        KeyCode::Down | KeyCode::Char('j') => Some(UiAction::MoveDown),
        KeyCode::Char(' ') | KeyCode::Enter => Some(UiAction::Toggle),
        KeyCode::Char('r') => Some(UiAction::Refresh),
        KeyCode::Char('t') => Some(UiAction::Retry),
        _ => None,
    }
}

/// Selection state for the project list.
#[derive(Debug, Default)]
pub struct PanelView {
    selected: usize,
}

impl PanelView {
    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self, rows: usize) {
        if rows > 0 && self.selected + 1 < rows {
            self.selected += 1;
        }
    }

    fn clamp(&mut self, rows: usize) {
        if rows == 0 {
            self.selected = 0;
        } else if self.selected >= rows {
            self.selected = rows - 1;
        }
    }

    pub fn selected_row<'a>(&self, snapshot: &'a PanelSnapshot) -> Option<&'a PanelRow> {
        snapshot.rows.get(self.selected)
    }
}

fn action_label(action: RowAction) -> &'static str {
    match action {
        RowAction::CreateIssue => "issue creation",
        RowAction::AttachTag => "tag attach",
        RowAction::DetachTag => "tag detach",
    }
}

fn row_item(row: &PanelRow) -> ListItem<'static> {
    let marker = if row.checked { "[x]" } else { "[ ]" };
    let mut spans = vec![Span::raw(format!("{marker} {}", row.name))];
    if let RowSync::Failed { action, reason } = &row.sync {
        spans.push(Span::styled(
            format!("  {} failed: {reason} (t to retry)", action_label(*action)),
            Style::default().fg(Color::Red),
        ));
    }
    ListItem::new(Line::from(spans))
}

pub fn render_panel(frame: &mut Frame, snapshot: &PanelSnapshot, view: &mut PanelView) {
    let layout = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(1),
        Constraint::Length(3),
    ]);
    let [header_area, list_area, footer_area] = layout.areas(frame.area());

    frame.render_widget(
        Paragraph::new(PANEL_TITLE).block(Block::default().borders(Borders::ALL)),
        header_area,
    );

    let list_block = Block::default().title("projects").borders(Borders::ALL);
    if snapshot.phase == PanelPhase::Init {
        frame.render_widget(
            Paragraph::new("Loading projects from the tracker...").block(list_block),
            list_area,
        );
    } else if snapshot.rows.is_empty() {
        frame.render_widget(
            Paragraph::new("No projects found.").block(list_block),
            list_area,
        );
    } else {
        view.clamp(snapshot.rows.len());
        let items: Vec<ListItem> = snapshot.rows.iter().map(row_item).collect();
        let list = List::new(items).block(list_block).highlight_symbol("> ");
        let mut list_state = ListState::default().with_selected(Some(view.selected()));
        frame.render_stateful_widget(list, list_area, &mut list_state);
    }

    let mut footer = String::from("space toggle | r refresh | t retry | q quit");
    if snapshot.phase == PanelPhase::Ready && !snapshot.tag_resolved {
        footer.push_str(" | sentinel tag unresolved, toggles disabled");
    }
    frame.render_widget(
        Paragraph::new(footer).block(Block::default().title("testpanel").borders(Borders::ALL)),
        footer_area,
    );
}

pub struct Ui {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Ui {
    pub fn init() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(Self { terminal })
    }

    /// Runs the synchronous UI loop: redraw on snapshot change or local
    /// input, translate key presses into controller commands. Returns when
    /// the user quits or the controller task goes away.
    pub fn run(&mut self, mut handle: PanelHandle, poll_timeout: Duration) -> io::Result<()> {
        let mut view = PanelView::default();
        let mut snapshot = handle.snapshots.borrow().clone();
        let mut force_draw = true;

        loop {
            let changed = match handle.snapshots.has_changed() {
                Ok(changed) => changed,
                Err(_) => break,
            };
            if changed {
                snapshot = handle.snapshots.borrow_and_update().clone();
            }

            if force_draw || changed {
                self.terminal
                    .draw(|frame| render_panel(frame, &snapshot, &mut view))?;
                force_draw = false;
            }

            if !event::poll(poll_timeout)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if key.kind != KeyEventKind::Press {
                continue;
            }

            match action_for_key(key) {
                Some(UiAction::Quit) => break,
                Some(UiAction::MoveUp) => {
                    view.move_up();
                    force_draw = true;
                }
                Some(UiAction::MoveDown) => {
                    view.move_down(snapshot.rows.len());
                    force_draw = true;
                }
                Some(UiAction::Toggle) => {
                    if let Some(row) = view.selected_row(&snapshot) {
                        let command = PanelCommand::Toggle {
                            project: row.project.clone(),
                            desired: !row.checked,
                        };
                        if !handle.send(command) {
                            break;
                        }
                    }
                }
                Some(UiAction::Refresh) => {
                    if !handle.send(PanelCommand::Refresh) {
                        break;
                    }
                }
                Some(UiAction::Retry) => {
                    if let Some(row) = view.selected_row(&snapshot) {
                        let command = PanelCommand::Retry {
                            project: row.project.clone(),
                        };
                        if !handle.send(command) {
                            break;
                        }
                    }
                }
                None => {}
            }
        }

        Ok(())
    }
}

impl Drop for Ui {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().execute(LeaveAlternateScreen);
    }
}

#[cfg(test)]
mod tests {
    use super::{action_for_key, render_panel, PanelView, UiAction};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use ratatui::backend::TestBackend;
    use ratatui::buffer::Buffer;
    use ratatui::Terminal;
    use testpanel_core::{PanelPhase, PanelRow, PanelSnapshot, RowAction, RowSync};

    fn snapshot(phase: PanelPhase, tag_resolved: bool, rows: Vec<PanelRow>) -> PanelSnapshot {
        PanelSnapshot {
            phase,
            tag_resolved,
            rows,
        }
    }

    fn row(project: &str, name: &str, checked: bool, sync: RowSync) -> PanelRow {
        PanelRow {
            project: project.into(),
            name: name.to_owned(),
            checked,
            sync,
        }
    }

    fn render_text(snapshot: &PanelSnapshot, width: u16, height: u16) -> String {
        let backend = TestBackend::new(width, height);
        let mut terminal = Terminal::new(backend).expect("test terminal should initialize");
        let mut view = PanelView::default();
        terminal
            .draw(|frame| render_panel(frame, snapshot, &mut view))
            .expect("render should succeed");
        buffer_to_string(terminal.backend().buffer())
    }

    fn buffer_to_string(buffer: &Buffer) -> String {
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn init_phase_renders_the_loading_view() {
        let text = render_text(&snapshot(PanelPhase::Init, false, Vec::new()), 60, 12);
        assert!(text.contains("Test Management Panel"));
        assert!(text.contains("Loading projects"));
    }

    #[test]
    fn ready_rows_render_markers_and_names() {
        let rows = vec![
            row("P1", "Alpha", true, RowSync::Idle),
            row("P2", "Beta", false, RowSync::Idle),
        ];
        let text = render_text(&snapshot(PanelPhase::Ready, true, rows), 60, 12);
        assert!(text.contains("[x] Alpha"));
        assert!(text.contains("[ ] Beta"));
    }

    #[test]
    fn failed_rows_render_the_failure_reason() {
        let rows = vec![row(
            "P1",
            "Alpha",
            false,
            RowSync::Failed {
                action: RowAction::AttachTag,
                reason: "status 502".to_owned(),
            },
        )];
        let text = render_text(&snapshot(PanelPhase::Ready, true, rows), 80, 12);
        assert!(text.contains("tag attach failed: status 502"));
    }

    #[test]
    fn unresolved_tag_is_called_out_in_the_footer() {
        let text = render_text(&snapshot(PanelPhase::Ready, false, Vec::new()), 80, 12);
        assert!(text.contains("sentinel tag unresolved"));

        let text = render_text(&snapshot(PanelPhase::Ready, true, Vec::new()), 80, 12);
        assert!(!text.contains("sentinel tag unresolved"));
    }

    #[test]
    fn key_mapping_covers_the_documented_bindings() {
        let plain = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(action_for_key(plain(KeyCode::Char('q'))), Some(UiAction::Quit));
        assert_eq!(action_for_key(plain(KeyCode::Esc)), Some(UiAction::Quit));
        assert_eq!(
            action_for_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(UiAction::Quit)
        );
        assert_eq!(action_for_key(plain(KeyCode::Up)), Some(UiAction::MoveUp));
        assert_eq!(action_for_key(plain(KeyCode::Char('k'))), Some(UiAction::MoveUp));
        assert_eq!(action_for_key(plain(KeyCode::Down)), Some(UiAction::MoveDown));
        assert_eq!(action_for_key(plain(KeyCode::Char('j'))), Some(UiAction::MoveDown));
        assert_eq!(action_for_key(plain(KeyCode::Char(' '))), Some(UiAction::Toggle));
        assert_eq!(action_for_key(plain(KeyCode::Enter)), Some(UiAction::Toggle));
        assert_eq!(action_for_key(plain(KeyCode::Char('r'))), Some(UiAction::Refresh));
        assert_eq!(action_for_key(plain(KeyCode::Char('t'))), Some(UiAction::Retry));
        assert_eq!(action_for_key(plain(KeyCode::Char('x'))), None);
    }

    #[test]
    fn selection_moves_within_bounds_and_clamps_after_shrink() {
        let mut view = PanelView::default();
        view.move_down(3);
        view.move_down(3);
        assert_eq!(view.selected(), 2);
        view.move_down(3);
        assert_eq!(view.selected(), 2, "selection stops at the last row");

        view.clamp(1);
        assert_eq!(view.selected(), 0);

        view.move_up();
        assert_eq!(view.selected(), 0, "selection stops at the first row");
    }
}
