use anyhow::{Context, Result};
use inquire::Select;
use std::fmt;
use tracing::{info, warn};

use crate::client::{BackendClient, ClientError};
use crate::config::Config;
use crate::plotting::ResultPlotter;
use crate::table::{ResultTable, SortColumn};
use crate::workflow::{self, Action, Effect, GroupBy, Selection};

use super::commands::print_table;

#[derive(Debug, Clone, Copy, PartialEq)]
enum NextStep {
    ShowResults,
    Sort(SortColumn),
    Plot,
    DownloadCsv,
    InteractiveGraph,
    ChangeOption,
    Quit,
}

impl fmt::Display for NextStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextStep::ShowResults => write!(f, "Show results"),
            NextStep::Sort(column) => write!(f, "Sort by {}", column.title()),
            NextStep::Plot => write!(f, "Plot results"),
            NextStep::DownloadCsv => write!(f, "Download CSV"),
            NextStep::InteractiveGraph => write!(f, "Interactive graph"),
            NextStep::ChangeOption => write!(f, "Pick another option"),
            NextStep::Quit => write!(f, "Quit"),
        }
    }
}

/// Line-by-line selection flow driven by terminal prompts
pub struct PromptSession {
    client: BackendClient,
    config: Config,
    selection: Selection,
    options: Vec<String>,
    table: ResultTable,
}

impl PromptSession {
    pub fn new(client: BackendClient, config: Config) -> Self {
        Self {
            client,
            config,
            selection: Selection::default(),
            options: Vec::new(),
            table: ResultTable::default(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let indicators = self.client.indicators().await.context("loading indicators")?;
        if indicators.is_empty() {
            println!("The backend offered no indicators.");
            return Ok(());
        }

        let names: Vec<String> = indicators.iter().map(|i| i.name.clone()).collect();
        let picked = Select::new("Indicator:", names).with_page_size(15).raw_prompt()?;
        self.apply(Action::ChooseIndicator(indicators[picked.index].clone())).await;

        let group_by = Select::new("Group by:", GroupBy::ALL.to_vec()).prompt()?;
        self.apply(Action::ChooseType(group_by)).await;

        self.pick_option().await?;

        loop {
            let mut steps = vec![NextStep::ShowResults];
            if !self.table.is_empty() {
                steps.extend(SortColumn::ALL.iter().map(|&c| NextStep::Sort(c)));
                steps.push(NextStep::Plot);
            }
            steps.extend([
                NextStep::DownloadCsv,
                NextStep::InteractiveGraph,
                NextStep::ChangeOption,
                NextStep::Quit,
            ]);

            match Select::new("Next:", steps).prompt()? {
                NextStep::ShowResults => self.apply(Action::ShowResults).await,
                NextStep::Sort(column) => {
                    self.table.click_header(column);
                    print_table(self.table.rows(), self.table.sort_state());
                }
                NextStep::Plot => {
                    let plotter =
                        ResultPlotter::new(self.config.plot_width, self.config.plot_height);
                    let group_by = self.selection.group_by.unwrap_or(GroupBy::Country);
                    let title = self.selection.option_label();
                    println!("{}", plotter.plot(self.table.rows(), group_by, title));
                }
                NextStep::DownloadCsv => self.apply(Action::DownloadCsv).await,
                NextStep::InteractiveGraph => self.apply(Action::InteractiveGraph).await,
                NextStep::ChangeOption => self.pick_option().await?,
                NextStep::Quit => break,
            }
        }

        Ok(())
    }

    async fn pick_option(&mut self) -> Result<()> {
        if self.options.is_empty() {
            println!("No options available for this indicator.");
            return Ok(());
        }
        let label = format!("{}:", self.selection.type_label());
        let option = Select::new(&label, self.options.clone())
            .with_page_size(15)
            .prompt()?;
        self.apply(Action::ChooseOption(option)).await;
        Ok(())
    }

    /// Run one workflow action. Backend failures are reported and the
    /// session carries on from the `Next:` menu.
    async fn apply(&mut self, action: Action) {
        let transition = workflow::update(&self.selection, action);
        self.selection = transition.selection;

        for effect in transition.effects {
            match effect {
                Effect::FetchOptions(query) => match self.client.options(&query).await {
                    Ok(options) => {
                        info!(
                            "{} options for {} / {}",
                            options.len(),
                            query.indicator,
                            query.group_by
                        );
                        self.options = options;
                    }
                    Err(e) => {
                        self.options.clear();
                        report("Could not load options", &e);
                    }
                },
                Effect::FetchData(query) => match self.client.data(&query).await {
                    Ok(rows) => {
                        self.table.replace(rows);
                        print_table(self.table.rows(), self.table.sort_state());
                    }
                    Err(e) => report("Could not load results", &e),
                },
                Effect::DownloadCsv(query) => {
                    let dest = &self.config.download_dir;
                    match self.client.download_csv(&query, dest, |_| {}).await {
                        Ok(path) => println!("💾 Saved {}", path.display()),
                        Err(e) => report("Download failed", &e),
                    }
                }
                Effect::PostGraph(query) => match self.client.interactive_graph(&query).await {
                    Ok(_) => println!("Interactive graph generated."),
                    Err(e) => {
                        warn!("There was a problem with the interactive graph request: {}", e)
                    }
                },
                Effect::Notify(notice) => eprintln!("⚠️  {}", notice),
            }
        }
    }
}

fn report(what: &str, err: &ClientError) {
    warn!("{}: {}", what, err);
    eprintln!("❌ {}: {}", what, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Indicator;
    use reqwest::{Client, Url};

    fn session() -> PromptSession {
        // nothing listens here, so every request fails to connect
        let client =
            BackendClient::with_client(Client::new(), Url::parse("http://127.0.0.1:9").unwrap());
        PromptSession::new(client, Config::default())
    }

    #[tokio::test]
    async fn test_failed_fetches_keep_session_alive() {
        let mut s = session();
        s.options = vec!["left over".into()];

        s.apply(Action::ChooseIndicator(Indicator::new("Population", "SP.POP.TOTL")))
            .await;
        s.apply(Action::ChooseType(GroupBy::Country)).await;
        assert!(s.options.is_empty());
        assert_eq!(s.selection.group_by, Some(GroupBy::Country));

        s.apply(Action::ChooseOption("Kenya".into())).await;
        s.apply(Action::ShowResults).await;
        assert!(s.selection.results_shown);
        assert!(s.table.is_empty());

        let dir = tempfile::tempdir().unwrap();
        s.config.download_dir = dir.path().to_path_buf();
        s.apply(Action::DownloadCsv).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
