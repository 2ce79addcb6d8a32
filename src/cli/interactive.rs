use anyhow::Result;
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Position, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span, Text},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, List, ListItem, ListState, Paragraph,
        Row, Table, TableState, Wrap,
    },
    Frame, Terminal,
};
use std::{future::Future, path::PathBuf, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::client::BackendClient;
use crate::config::Config;
use crate::dropdown::DropdownSet;
use crate::plotting::{series_points, value_stats};
use crate::search::ChoiceFilter;
use crate::table::{format_value, ResultRow, ResultTable, SortColumn};
use crate::workflow::{
    self, Action, DataQuery, Effect, GroupBy, Indicator, Notice, OptionsQuery, Selection, Stage,
};

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
const MENU_MAX_HEIGHT: u16 = 14;
const COLUMN_WIDTHS: [Constraint; 3] = [
    Constraint::Percentage(50),
    Constraint::Percentage(20),
    Constraint::Percentage(30),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Menu {
    Indicator,
    Type,
    Option,
}

impl Menu {
    const ALL: [Menu; 3] = [Menu::Indicator, Menu::Type, Menu::Option];

    fn title(self) -> &'static str {
        match self {
            Menu::Indicator => " [i] Indicator ",
            Menu::Type => " [t] Type ",
            Menu::Option => " [o] Option ",
        }
    }

    fn next(self) -> Menu {
        match self {
            Menu::Indicator => Menu::Type,
            Menu::Type => Menu::Option,
            Menu::Option => Menu::Indicator,
        }
    }
}

/// Results of background fetches, sent back to the UI loop
#[derive(Debug)]
pub(crate) enum FetchResult {
    Indicators(Result<Vec<Indicator>, String>),
    Options {
        query: OptionsQuery,
        result: Result<Vec<String>, String>,
    },
    Data {
        query: DataQuery,
        result: Result<Vec<ResultRow>, String>,
    },
    Download(Result<PathBuf, String>),
    Graph(Result<String, String>),
}

#[derive(Debug, Clone, PartialEq)]
struct StatusLine {
    text: String,
    error: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Labels of the query whose rows are in the table
#[derive(Debug, Clone, PartialEq)]
struct ShownResults {
    indicator: String,
    group_by: GroupBy,
    option: String,
}

/// Screen regions from the last draw, used for mouse hit-testing
#[derive(Debug, Default, Clone)]
struct Hitboxes {
    buttons: Vec<(Menu, Rect)>,
    menu: Option<Rect>,
    headers: Vec<(SortColumn, Rect)>,
}

pub struct InteractiveExplorer {
    client: BackendClient,
    config: Config,

    selection: Selection,
    dropdowns: DropdownSet<Menu>,

    // Choices behind each dropdown
    indicators: Vec<Indicator>,
    options: Vec<String>,
    indicators_loading: bool,
    options_loading: bool,

    // Open menu filtering
    filter: ChoiceFilter,
    filter_query: String,
    visible: Vec<usize>,
    menu_state: ListState,

    // Results
    table: ResultTable,
    table_state: TableState,
    pending_data: Option<DataQuery>,
    shown: Option<ShownResults>,
    show_plot: bool,

    notice: Option<Notice>,
    status: Option<StatusLine>,
    spinner_frame: usize,
    hitboxes: Hitboxes,

    sender: mpsc::UnboundedSender<FetchResult>,
    receiver: mpsc::UnboundedReceiver<FetchResult>,
}

impl InteractiveExplorer {
    pub fn new(client: BackendClient, config: Config) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            client,
            config,
            selection: Selection::default(),
            dropdowns: DropdownSet::new(Menu::ALL),
            indicators: Vec::new(),
            options: Vec::new(),
            indicators_loading: false,
            options_loading: false,
            filter: ChoiceFilter::new(),
            filter_query: String::new(),
            visible: Vec::new(),
            menu_state: ListState::default(),
            table: ResultTable::default(),
            table_state: TableState::default(),
            pending_data: None,
            shown: None,
            show_plot: true,
            notice: None,
            status: None,
            spinner_frame: 0,
            hitboxes: Hitboxes::default(),
            sender,
            receiver,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        info!("🎯 Explorer session started against {}", self.client.base_url());
        self.load_indicators();

        let result = self.run_app(&mut terminal).await;

        info!("🏁 Explorer session ended");

        // Restore terminal even when the loop failed
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
        terminal.show_cursor()?;

        result
    }

    async fn run_app<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            // Apply whatever background fetches finished since the last frame
            while let Ok(message) = self.receiver.try_recv() {
                self.process_fetch_result(message);
            }

            // Short poll keeps the spinner moving while fetches are in flight
            if event::poll(Duration::from_millis(100))? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if self.handle_key(key) == Flow::Quit {
                            return Ok(());
                        }
                    }
                    Event::Mouse(mouse) => self.handle_mouse(mouse),
                    _ => {}
                }
            }
        }
    }

    /// Run one workflow action and carry out its effects
    fn apply(&mut self, action: Action) {
        let resets_options = matches!(action, Action::ChooseIndicator(_) | Action::ChooseType(_));

        let transition = workflow::update(&self.selection, action);
        self.selection = transition.selection;

        if resets_options {
            self.options.clear();
            self.options_loading = false;
        }

        for effect in transition.effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::FetchOptions(query) => {
                self.options_loading = true;
                self.spawn_fetch(move |client| async move {
                    let result = client.options(&query).await.map_err(|e| e.to_string());
                    FetchResult::Options { query, result }
                });
            }
            Effect::FetchData(query) => {
                self.pending_data = Some(query.clone());
                self.set_status(format!("Fetching results for {}...", query.option), false);
                self.spawn_fetch(move |client| async move {
                    let result = client.data(&query).await.map_err(|e| e.to_string());
                    FetchResult::Data { query, result }
                });
            }
            Effect::DownloadCsv(query) => {
                let dest = self.config.download_dir.clone();
                self.set_status(format!("Downloading CSV into {}...", dest.display()), false);
                self.spawn_fetch(move |client| async move {
                    let result = client
                        .download_csv(&query, &dest, |_| {})
                        .await
                        .map_err(|e| e.to_string());
                    FetchResult::Download(result)
                });
            }
            Effect::PostGraph(query) => {
                self.set_status("Requesting interactive graph...".to_string(), false);
                self.spawn_fetch(move |client| async move {
                    let result = client.interactive_graph(&query).await.map_err(|e| e.to_string());
                    FetchResult::Graph(result)
                });
            }
            Effect::Notify(notice) => {
                debug!("Notice raised: {}", notice);
                self.notice = Some(notice);
            }
        }
    }

    fn spawn_fetch<F, Fut>(&self, make: F)
    where
        F: FnOnce(BackendClient) -> Fut,
        Fut: Future<Output = FetchResult> + Send + 'static,
    {
        let fut = make(self.client.clone());
        let sender = self.sender.clone();
        tokio::spawn(async move {
            // receiver only goes away when the session is over
            let _ = sender.send(fut.await);
        });
    }

    fn load_indicators(&mut self) {
        if self.indicators_loading {
            return;
        }
        self.indicators_loading = true;
        self.spawn_fetch(|client| async move {
            FetchResult::Indicators(client.indicators().await.map_err(|e| e.to_string()))
        });
    }

    fn process_fetch_result(&mut self, message: FetchResult) {
        match message {
            FetchResult::Indicators(result) => {
                self.indicators_loading = false;
                match result {
                    Ok(indicators) => {
                        info!("📋 {} indicators available", indicators.len());
                        self.indicators = indicators;
                        self.refresh_visible_if_open(Menu::Indicator);
                    }
                    Err(e) => {
                        warn!("Indicator list failed: {}", e);
                        let text = format!("Could not load indicators: {} (r to retry)", e);
                        self.set_status(text, true);
                    }
                }
            }
            FetchResult::Options { query, result } => {
                if self.selection.options_query().as_ref() != Some(&query) {
                    debug!("Dropping stale options for {} / {}", query.indicator, query.group_by);
                    return;
                }
                self.options_loading = false;
                match result {
                    Ok(options) => {
                        debug!(
                            "{} options for {} / {}",
                            options.len(),
                            query.indicator,
                            query.group_by
                        );
                        self.options = options;
                        self.refresh_visible_if_open(Menu::Option);
                    }
                    Err(e) => {
                        warn!("Options fetch failed: {}", e);
                        self.set_status(format!("Could not load options: {}", e), true);
                    }
                }
            }
            FetchResult::Data { query, result } => {
                if self.pending_data.as_ref() == Some(&query) {
                    self.pending_data = None;
                }
                if self.selection.data_query().as_ref() != Some(&query) {
                    debug!("Dropping stale results for {} / {}", query.indicator, query.option);
                    if self.pending_data.is_none() {
                        let text = "Selection changed; press 's' to show results";
                        self.set_status(text.to_string(), false);
                    }
                    return;
                }
                match result {
                    Ok(rows) => {
                        self.set_status(format!("{} rows for {}", rows.len(), query.option), false);
                        self.shown = Some(ShownResults {
                            indicator: self.selection.indicator_label().to_string(),
                            group_by: query.group_by,
                            option: query.option,
                        });
                        self.table.replace(rows);
                        self.table_state.select(if self.table.is_empty() { None } else { Some(0) });
                    }
                    Err(e) => {
                        warn!("Data fetch failed: {}", e);
                        self.set_status(format!("Could not load results: {}", e), true);
                    }
                }
            }
            FetchResult::Download(result) => match result {
                Ok(path) => self.set_status(format!("💾 Saved {}", path.display()), false),
                Err(e) => {
                    warn!("CSV download failed: {}", e);
                    self.set_status(format!("Download failed: {}", e), true);
                }
            },
            FetchResult::Graph(result) => match result {
                Ok(_) => {
                    info!("Interactive graph generated");
                    self.set_status("Interactive graph generated.".to_string(), false);
                }
                Err(e) => {
                    // logged only; the graph is a server-side side effect
                    warn!("There was a problem with the interactive graph request: {}", e);
                    self.set_status(format!("Interactive graph request failed: {}", e), true);
                }
            },
        }
    }

    fn set_status(&mut self, text: String, error: bool) {
        self.status = Some(StatusLine { text, error });
    }

    fn menu_items(&self, menu: Menu) -> Vec<String> {
        match menu {
            Menu::Indicator => self.indicators.iter().map(|i| i.name.clone()).collect(),
            Menu::Type => GroupBy::ALL.iter().map(|g| g.label().to_string()).collect(),
            Menu::Option => self.options.clone(),
        }
    }

    fn toggle_menu(&mut self, menu: Menu) {
        self.dropdowns.toggle(menu);
        self.filter_query.clear();

        if !self.dropdowns.is_open(menu) {
            return;
        }

        match menu {
            Menu::Indicator if self.indicators.is_empty() => self.load_indicators(),
            Menu::Option if self.selection.options_query().is_none() => {
                self.set_status("Choose an indicator and a type first".to_string(), false);
            }
            _ => {}
        }
        self.refresh_visible();
    }

    fn refresh_visible(&mut self) {
        let Some(menu) = self.dropdowns.open_dropdown() else {
            self.visible.clear();
            return;
        };
        let items = self.menu_items(menu);
        self.visible = self.filter.filter(&items, &self.filter_query);
        self.menu_state.select(if self.visible.is_empty() { None } else { Some(0) });
    }

    fn refresh_visible_if_open(&mut self, menu: Menu) {
        if self.dropdowns.is_open(menu) {
            self.refresh_visible();
        }
    }

    fn move_menu_selection(&mut self, delta: isize) {
        if self.visible.is_empty() {
            return;
        }
        let current = self.menu_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, self.visible.len() as isize - 1);
        self.menu_state.select(Some(next as usize));
    }

    /// Choose the highlighted entry of the open menu
    fn pick(&mut self) {
        let Some(menu) = self.dropdowns.open_dropdown() else {
            return;
        };
        let Some(&index) = self.menu_state.selected().and_then(|pos| self.visible.get(pos)) else {
            return;
        };

        let action = match menu {
            Menu::Indicator => self.indicators.get(index).cloned().map(Action::ChooseIndicator),
            Menu::Type => GroupBy::ALL.get(index).copied().map(Action::ChooseType),
            Menu::Option => self.options.get(index).cloned().map(Action::ChooseOption),
        };

        self.dropdowns.close(menu);
        self.filter_query.clear();
        self.visible.clear();

        if let Some(action) = action {
            self.apply(action);
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Flow {
        // Notices block until acknowledged
        if self.notice.take().is_some() {
            return Flow::Continue;
        }

        if let Some(menu) = self.dropdowns.open_dropdown() {
            match key.code {
                KeyCode::Esc => self.dropdowns.click_outside(),
                KeyCode::Tab => self.toggle_menu(menu.next()),
                KeyCode::Enter => self.pick(),
                KeyCode::Up => self.move_menu_selection(-1),
                KeyCode::Down => self.move_menu_selection(1),
                KeyCode::PageUp => self.move_menu_selection(-10),
                KeyCode::PageDown => self.move_menu_selection(10),
                KeyCode::Backspace => {
                    self.filter_query.pop();
                    self.refresh_visible();
                }
                KeyCode::Char(c) => {
                    self.filter_query.push(c);
                    self.refresh_visible();
                }
                _ => {}
            }
            return Flow::Continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
            KeyCode::Char('i') | KeyCode::Char('1') => self.toggle_menu(Menu::Indicator),
            KeyCode::Char('t') | KeyCode::Char('2') => self.toggle_menu(Menu::Type),
            KeyCode::Char('o') | KeyCode::Char('3') | KeyCode::Tab => {
                self.toggle_menu(Menu::Option)
            }
            KeyCode::Char('s') | KeyCode::Enter => self.apply(Action::ShowResults),
            KeyCode::Char('d') => self.apply(Action::DownloadCsv),
            KeyCode::Char('v') => self.apply(Action::InteractiveGraph),
            KeyCode::Char('p') => self.show_plot = !self.show_plot,
            KeyCode::Char('r') => self.load_indicators(),
            KeyCode::F(n @ 1..=3) => {
                if let Some(column) = SortColumn::from_index(n as usize - 1) {
                    self.click_header(column);
                }
            }
            KeyCode::Up => self.scroll_table(-1),
            KeyCode::Down => self.scroll_table(1),
            KeyCode::PageUp => self.scroll_table(-20),
            KeyCode::PageDown => self.scroll_table(20),
            _ => {}
        }
        Flow::Continue
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::Down(MouseButton::Left) => {}
            MouseEventKind::ScrollDown if self.dropdowns.open_dropdown().is_none() => {
                return self.scroll_table(3)
            }
            MouseEventKind::ScrollUp if self.dropdowns.open_dropdown().is_none() => {
                return self.scroll_table(-3)
            }
            _ => return,
        }

        if self.notice.take().is_some() {
            return;
        }

        let at = Position::new(mouse.column, mouse.row);

        let button = self.hitboxes.buttons.iter().find(|(_, r)| r.contains(at));
        if let Some(&(menu, _)) = button {
            self.toggle_menu(menu);
            return;
        }

        if let Some(area) = self.hitboxes.menu.filter(|r| r.contains(at)) {
            let pos = (at.y - area.y) as usize + self.menu_state.offset();
            if pos < self.visible.len() {
                self.menu_state.select(Some(pos));
                self.pick();
            }
            return;
        }

        // Anything else counts as a click outside the dropdowns
        self.dropdowns.click_outside();

        let header = self.hitboxes.headers.iter().find(|(_, r)| r.contains(at));
        if let Some(&(column, _)) = header {
            self.click_header(column);
        }
    }

    fn click_header(&mut self, column: SortColumn) {
        if self.table.is_empty() {
            return;
        }
        self.table.click_header(column);
        self.table_state.select(Some(0));
    }

    fn scroll_table(&mut self, delta: isize) {
        if self.table.is_empty() {
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, self.table.len() as isize - 1);
        self.table_state.select(Some(next as usize));
    }

    fn is_loading(&self) -> bool {
        self.indicators_loading || self.options_loading || self.pending_data.is_some()
    }

    fn spinner(&mut self) -> char {
        let c = SPINNER[self.spinner_frame % SPINNER.len()];
        self.spinner_frame = (self.spinner_frame + 1) % SPINNER.len();
        c
    }

    fn ui(&mut self, f: &mut Frame) {
        let area = f.area();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(area);

        self.render_buttons(f, rows[0]);

        let plot_visible = self.show_plot
            && !self.table.is_empty()
            && self.shown.as_ref().is_some_and(|s| s.group_by == GroupBy::Country);
        if plot_visible {
            let body = Layout::default()
                .direction(Direction::Horizontal)
                .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
                .split(rows[1]);
            self.render_table(f, body[0]);
            self.render_chart(f, body[1]);
        } else {
            self.render_table(f, rows[1]);
        }

        self.render_status(f, rows[2]);

        let help = if self.dropdowns.open_dropdown().is_some() {
            "type: filter, ↑/↓: move, Enter: choose, Tab: next menu, Esc: close"
        } else {
            "i/t/o: menus, s: show results, d: download CSV, v: interactive graph, \
             F1-F3: sort, p: plot, q: quit"
        };
        let help =
            Paragraph::new(help).style(Style::default().bg(Color::DarkGray).fg(Color::White));
        f.render_widget(help, rows[3]);

        self.hitboxes.menu = None;
        if let Some(menu) = self.dropdowns.open_dropdown() {
            self.render_menu(f, menu, area);
        }

        if let Some(notice) = self.notice {
            Self::render_notice(f, area, notice);
        }
    }

    fn render_buttons(&mut self, f: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(COLUMN_WIDTHS)
            .split(area);

        self.hitboxes.buttons.clear();
        for (menu, chunk) in Menu::ALL.into_iter().zip(chunks.iter()) {
            let label = match menu {
                Menu::Indicator => self.selection.indicator_label(),
                Menu::Type => self.selection.type_label(),
                Menu::Option => self.selection.option_label(),
            };
            let open = self.dropdowns.is_open(menu);
            let border = if open {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };

            let arrow = if open { "▴" } else { "▾" };
            let button = Paragraph::new(format!("{} {}", label, arrow)).block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border)
                    .title(menu.title()),
            );
            f.render_widget(button, *chunk);
            self.hitboxes.buttons.push((menu, *chunk));
        }
    }

    fn render_menu(&mut self, f: &mut Frame, menu: Menu, area: Rect) {
        let Some(&(_, anchor)) = self.hitboxes.buttons.iter().find(|(m, _)| *m == menu) else {
            return;
        };

        let loading = match menu {
            Menu::Indicator => self.indicators_loading,
            Menu::Option => self.options_loading,
            Menu::Type => false,
        };

        let items = self.menu_items(menu);
        let list_items: Vec<ListItem> = if loading {
            let text = format!("{} loading...", self.spinner());
            vec![ListItem::new(text).style(Style::default().fg(Color::Yellow))]
        } else if self.visible.is_empty() {
            vec![ListItem::new("(no matches)").style(Style::default().fg(Color::DarkGray))]
        } else {
            self.visible.iter().map(|&i| ListItem::new(items[i].clone())).collect()
        };

        let height = (list_items.len() as u16 + 2).min(MENU_MAX_HEIGHT);
        let width = anchor.width.max(30).min(area.width.saturating_sub(anchor.x));
        let popup = Rect::new(anchor.x, anchor.y + anchor.height, width, height)
            .intersection(area);

        let title = if self.filter_query.is_empty() {
            format!(" {} choices ", self.visible.len())
        } else {
            format!(" filter: {} ({}) ", self.filter_query, self.visible.len())
        };

        let list = List::new(list_items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().bg(Color::Blue).fg(Color::White))
            .highlight_symbol("▶ ");

        f.render_widget(Clear, popup);
        f.render_stateful_widget(list, popup, &mut self.menu_state);

        if !loading {
            self.hitboxes.menu = Some(Block::default().borders(Borders::ALL).inner(popup));
        }
    }

    fn render_table(&mut self, f: &mut Frame, area: Rect) {
        let title = match &self.shown {
            Some(shown) => format!(
                " Results: {} / {} ({} rows) ",
                shown.indicator,
                shown.option,
                self.table.len()
            ),
            None => " Results ".to_string(),
        };
        let block = Block::default().borders(Borders::ALL).title(title);
        let inner = block.inner(area);

        if self.pending_data.is_some() && self.table.is_empty() {
            let spinner = self.spinner();
            let loading = Paragraph::new(Text::from(vec![
                Line::from(""),
                Line::from(Span::styled(
                    format!("{} LOADING RESULTS...", spinner),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                )),
            ]))
            .block(block)
            .alignment(Alignment::Center);
            f.render_widget(loading, area);
            self.hitboxes.headers.clear();
            return;
        }

        if self.table.is_empty() {
            let hint = match self.selection.stage() {
                Stage::NoIndicator => "Press 'i' to pick an indicator",
                Stage::IndicatorChosen => "Press 't' to group by country or year",
                Stage::TypeChosen => "Press 'o' to pick an option",
                Stage::OptionChosen => "Press 's' to show results",
                Stage::ResultsShown => "No rows returned for this selection",
            };
            let empty = Paragraph::new(hint)
                .style(Style::default().fg(Color::Gray))
                .block(block)
                .alignment(Alignment::Center)
                .wrap(Wrap { trim: true });
            f.render_widget(empty, area);
            self.hitboxes.headers.clear();
            return;
        }

        let sort = *self.table.sort_state();
        let header = Row::new(SortColumn::ALL.iter().map(|&c| {
            let text = format!("{}{}", c.title(), sort.arrow(c));
            let line = if c == SortColumn::Value {
                Line::from(text).alignment(Alignment::Right)
            } else {
                Line::from(text)
            };
            Cell::from(line)
        }))
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = self
            .table
            .rows()
            .iter()
            .map(|r| {
                Row::new(vec![
                    Cell::from(r.country.clone()),
                    Cell::from(r.date.clone()),
                    Cell::from(Line::from(format_value(r.value)).alignment(Alignment::Right)),
                ])
            })
            .collect();

        let table = Table::new(rows, COLUMN_WIDTHS)
            .header(header)
            .block(block)
            .column_spacing(1)
            .highlight_style(Style::default().bg(Color::Blue).fg(Color::White));
        f.render_stateful_widget(table, area, &mut self.table_state);

        // Header cells sit on the first line inside the border
        let header_row = Rect::new(inner.x, inner.y, inner.width, 1.min(inner.height));
        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(COLUMN_WIDTHS)
            .spacing(1)
            .split(header_row);
        self.hitboxes.headers = SortColumn::ALL.into_iter().zip(cells.iter().copied()).collect();
    }

    fn render_chart(&mut self, f: &mut Frame, area: Rect) {
        let rows = self.table.rows();
        let data = series_points(rows);
        let (indicator, option) = self
            .shown
            .as_ref()
            .map_or(("", ""), |s| (s.indicator.as_str(), s.option.as_str()));
        let title = format!(" {} ", option);

        if data.is_empty() {
            let empty = Paragraph::new("No finite values to plot")
                .block(Block::default().borders(Borders::ALL).title(title))
                .alignment(Alignment::Center);
            f.render_widget(empty, area);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(4)])
            .split(area);

        let x_min = data[0].0;
        let x_max = data[data.len() - 1].0.max(x_min + 1.0);
        let y_min = data.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let y_max = data.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        let y_range = y_max - y_min;
        let y_padding = if y_range > 0.0 { y_range * 0.1 } else { 1.0 };
        let (y_lo, y_hi) = (y_min - y_padding, y_max + y_padding);

        let datasets = vec![Dataset::default()
            .name(indicator.to_string())
            .marker(symbols::Marker::Braille)
            .style(Style::default().fg(Color::Cyan))
            .data(&data)];

        let chart = Chart::new(datasets)
            .block(Block::default().borders(Borders::ALL).title(Span::styled(
                title,
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            )))
            .x_axis(
                Axis::default()
                    .title("Year")
                    .style(Style::default().fg(Color::Gray))
                    .labels(vec![
                        Span::raw(format!("{}", x_min)),
                        Span::raw(format!("{}", ((x_min + x_max) / 2.0).round())),
                        Span::raw(format!("{}", x_max)),
                    ])
                    .bounds([x_min, x_max]),
            )
            .y_axis(
                Axis::default()
                    .title("Value")
                    .style(Style::default().fg(Color::Gray))
                    .labels(vec![
                        Span::raw(format_value(y_lo)),
                        Span::raw(format_value((y_lo + y_hi) / 2.0)),
                        Span::raw(format_value(y_hi)),
                    ])
                    .bounds([y_lo, y_hi]),
            );
        f.render_widget(chart, chunks[0]);

        let stats = match value_stats(rows) {
            Some((min, max, avg)) => vec![
                Line::from(vec![
                    Span::styled("Min: ", Style::default().fg(Color::Cyan)),
                    Span::raw(format_value(min)),
                    Span::styled("  Max: ", Style::default().fg(Color::Cyan)),
                    Span::raw(format_value(max)),
                ]),
                Line::from(vec![
                    Span::styled("Avg: ", Style::default().fg(Color::Cyan)),
                    Span::raw(format_value(avg)),
                    Span::styled("  Points: ", Style::default().fg(Color::Cyan)),
                    Span::raw(data.len().to_string()),
                ]),
            ],
            None => Vec::new(),
        };
        let stats_panel = Paragraph::new(Text::from(stats)).block(
            Block::default()
                .borders(Borders::ALL)
                .title(Span::styled(" Statistics ", Style::default().fg(Color::Blue))),
        );
        f.render_widget(stats_panel, chunks[1]);
    }

    fn render_status(&mut self, f: &mut Frame, area: Rect) {
        let line = if self.is_loading() {
            let spinner = self.spinner();
            let text = self.status.as_ref().map_or("Loading...", |s| s.text.as_str());
            Line::from(Span::styled(
                format!("{} {}", spinner, text),
                Style::default().fg(Color::Yellow),
            ))
        } else if let Some(status) = &self.status {
            let color = if status.error { Color::Red } else { Color::Green };
            Line::from(Span::styled(status.text.clone(), Style::default().fg(color)))
        } else {
            Line::from(Span::styled(
                format!("Connected to {}", self.client.base_url()),
                Style::default().fg(Color::DarkGray),
            ))
        };
        f.render_widget(Paragraph::new(line), area);
    }

    fn render_notice(f: &mut Frame, area: Rect, notice: Notice) {
        let width = 64.min(area.width);
        let height = 7.min(area.height);
        let popup = Rect::new(
            area.x + (area.width - width) / 2,
            area.y + (area.height - height) / 2,
            width,
            height,
        );

        let body = Paragraph::new(Text::from(vec![
            Line::from(""),
            Line::from(Span::styled(
                notice.message(),
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
            Line::from(Span::styled("Press any key", Style::default().fg(Color::Gray))),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(Span::styled(
                    " Notice ",
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                )),
        )
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

        f.render_widget(Clear, popup);
        f.render_widget(body, popup);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyModifiers;
    use ratatui::backend::TestBackend;
    use reqwest::{Client, Url};

    fn explorer() -> InteractiveExplorer {
        // nothing listens here; spawned fetches fail quietly in the background
        let client =
            BackendClient::with_client(Client::new(), Url::parse("http://127.0.0.1:9").unwrap());
        let mut explorer = InteractiveExplorer::new(client, Config::default());
        explorer.indicators = vec![
            Indicator::new("GDP (current US$)", "NY.GDP.MKTP.CD"),
            Indicator::new("Population", "SP.POP.TOTL"),
        ];
        explorer
    }

    fn press(explorer: &mut InteractiveExplorer, code: KeyCode) -> Flow {
        explorer.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn type_text(explorer: &mut InteractiveExplorer, text: &str) {
        for c in text.chars() {
            press(explorer, KeyCode::Char(c));
        }
    }

    fn row(country: &str, date: &str, value: f64) -> ResultRow {
        ResultRow {
            country: country.to_string(),
            date: date.to_string(),
            value,
        }
    }

    fn screen_text(explorer: &mut InteractiveExplorer) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|f| explorer.ui(f)).unwrap();
        terminal.backend().buffer().content().iter().map(|c| c.symbol()).collect()
    }

    #[tokio::test]
    async fn test_menu_filter_and_pick() {
        let mut e = explorer();

        press(&mut e, KeyCode::Char('i'));
        assert_eq!(e.dropdowns.open_dropdown(), Some(Menu::Indicator));

        type_text(&mut e, "popu");
        assert_eq!(e.visible, vec![1]);

        press(&mut e, KeyCode::Enter);
        assert_eq!(e.dropdowns.open_dropdown(), None);
        assert_eq!(e.selection.indicator_label(), "Population");
        assert!(!e.options_loading);
    }

    #[tokio::test]
    async fn test_type_after_indicator_starts_options_fetch() {
        let mut e = explorer();
        e.apply(Action::ChooseIndicator(e.indicators[0].clone()));
        assert!(!e.options_loading);

        press(&mut e, KeyCode::Char('t'));
        press(&mut e, KeyCode::Down);
        press(&mut e, KeyCode::Enter);

        assert_eq!(e.selection.group_by, Some(GroupBy::Year));
        assert!(e.options_loading);
    }

    #[tokio::test]
    async fn test_stale_options_are_dropped() {
        let mut e = explorer();
        e.apply(Action::ChooseIndicator(e.indicators[0].clone()));
        e.apply(Action::ChooseType(GroupBy::Country));

        e.process_fetch_result(FetchResult::Options {
            query: OptionsQuery {
                indicator: "SP.POP.TOTL".into(),
                group_by: GroupBy::Country,
            },
            result: Ok(vec!["Stale".into()]),
        });
        assert!(e.options.is_empty());
        assert!(e.options_loading);

        e.process_fetch_result(FetchResult::Options {
            query: OptionsQuery {
                indicator: "NY.GDP.MKTP.CD".into(),
                group_by: GroupBy::Country,
            },
            result: Ok(vec!["Kenya".into(), "Chad".into()]),
        });
        assert_eq!(e.options, vec!["Kenya", "Chad"]);
        assert!(!e.options_loading);
    }

    fn show_population(e: &mut InteractiveExplorer, option: &str) -> DataQuery {
        e.apply(Action::ChooseIndicator(e.indicators[1].clone()));
        e.apply(Action::ChooseType(GroupBy::Year));
        e.apply(Action::ChooseOption(option.into()));
        e.apply(Action::ShowResults);
        e.selection.data_query().unwrap()
    }

    #[tokio::test]
    async fn test_stale_results_clear_loading() {
        let mut e = explorer();
        let query = show_population(&mut e, "2020");
        assert!(e.is_loading());

        // option changes before the 2020 rows arrive
        e.apply(Action::ChooseOption("2019".into()));
        e.options_loading = false;
        e.process_fetch_result(FetchResult::Data {
            query,
            result: Ok(vec![row("Kenya", "2020", 10.0)]),
        });

        assert!(e.table.is_empty());
        assert!(e.pending_data.is_none());
        assert!(!e.is_loading());
        assert!(!screen_text(&mut e).contains("LOADING RESULTS"));
    }

    #[tokio::test]
    async fn test_stale_results_keep_newer_fetch_loading() {
        let mut e = explorer();
        let old = show_population(&mut e, "2020");
        let newer = show_population(&mut e, "2019");

        e.process_fetch_result(FetchResult::Data {
            query: old,
            result: Ok(vec![row("Kenya", "2020", 10.0)]),
        });
        assert_eq!(e.pending_data.as_ref(), Some(&newer));
        assert!(e.table.is_empty());

        e.process_fetch_result(FetchResult::Data {
            query: newer,
            result: Ok(vec![row("Kenya", "2019", 9.0)]),
        });
        assert!(e.pending_data.is_none());
        assert_eq!(e.table.len(), 1);
    }

    #[tokio::test]
    async fn test_results_title_names_rows_on_screen() {
        let mut e = explorer();
        let query = show_population(&mut e, "2020");
        e.process_fetch_result(FetchResult::Data {
            query,
            result: Ok(vec![row("Kenya", "2020", 10.0)]),
        });

        e.apply(Action::ChooseOption("2019".into()));
        let screen = screen_text(&mut e);
        assert!(screen.contains("Results: Population / 2020 (1 rows)"));
        assert!(!screen.contains("Population / 2019"));
    }

    #[test]
    fn test_show_results_without_selection_raises_notice() {
        let mut e = explorer();
        press(&mut e, KeyCode::Char('s'));
        assert_eq!(e.notice, Some(Notice::IncompleteBeforeResults));
        assert!(e.pending_data.is_none());

        // any key acknowledges, and does nothing else
        assert_eq!(press(&mut e, KeyCode::Char('q')), Flow::Continue);
        assert_eq!(e.notice, None);
        assert_eq!(press(&mut e, KeyCode::Char('q')), Flow::Quit);
    }

    #[test]
    fn test_download_before_results_raises_notice() {
        let mut e = explorer();
        press(&mut e, KeyCode::Char('d'));
        assert_eq!(e.notice, Some(Notice::ResultsBeforeDownload));
    }

    #[tokio::test]
    async fn test_results_render_and_sort() {
        let mut e = explorer();
        e.apply(Action::ChooseIndicator(e.indicators[1].clone()));
        e.apply(Action::ChooseType(GroupBy::Year));
        e.apply(Action::ChooseOption("2020".into()));
        e.apply(Action::ShowResults);
        assert!(e.pending_data.is_some());

        let query = e.selection.data_query().unwrap();
        e.process_fetch_result(FetchResult::Data {
            query,
            result: Ok(vec![row("Kenya", "2020", 10.0), row("Chad", "2020", 2.0)]),
        });
        assert!(e.pending_data.is_none());

        press(&mut e, KeyCode::F(3));
        let values: Vec<f64> = e.table.rows().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 10.0]);

        let screen = screen_text(&mut e);
        assert!(screen.contains("Value ↑"));
        assert!(screen.contains("Kenya"));
        assert!(screen.contains("10.00"));
    }

    #[test]
    fn test_placeholder_labels_render() {
        let mut e = explorer();
        let screen = screen_text(&mut e);
        assert!(screen.contains("Select an Indicator"));
        assert!(screen.contains("Select Type"));
        assert!(screen.contains("Select an Option"));
    }

    #[test]
    fn test_mouse_click_outside_closes_menu() {
        let mut e = explorer();
        screen_text(&mut e);

        let (_, indicator_button) = e.hitboxes.buttons[0];
        let click = |column, row| MouseEvent {
            kind: MouseEventKind::Down(MouseButton::Left),
            column,
            row,
            modifiers: KeyModifiers::NONE,
        };

        e.handle_mouse(click(indicator_button.x + 1, indicator_button.y + 1));
        assert!(e.dropdowns.is_open(Menu::Indicator));

        e.handle_mouse(click(100, 25));
        assert_eq!(e.dropdowns.open_dropdown(), None);
    }
}
