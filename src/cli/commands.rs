use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::client::BackendClient;
use crate::config::Config;
use crate::plotting::ResultPlotter;
use crate::table::{format_value, sort_rows, ResultRow, SortColumn, SortState};
use crate::workflow::{DataQuery, GroupBy, OptionsQuery};

use super::interactive::InteractiveExplorer;
use super::prompt::PromptSession;

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

/// The indicator/type/option triple shared by the data commands
#[derive(Args, Debug)]
pub struct SelectionArgs {
    /// Indicator code, e.g. NY.GDP.MKTP.CD
    #[arg(short, long)]
    pub indicator: String,

    /// Group the data by country or by year
    #[arg(short = 't', long = "type", value_enum)]
    pub group_by: GroupBy,

    /// Country name or year to select
    #[arg(short, long)]
    pub option: String,
}

impl SelectionArgs {
    fn query(&self) -> DataQuery {
        DataQuery {
            indicator: self.indicator.clone(),
            group_by: self.group_by,
            option: self.option.clone(),
        }
    }
}

#[derive(Args)]
pub struct ExploreCommand {}

impl ExploreCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        InteractiveExplorer::new(client, config).run().await
    }
}

#[derive(Args)]
pub struct PromptCommand {}

impl PromptCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        PromptSession::new(client, config).run().await
    }
}

#[derive(Args)]
pub struct IndicatorsCommand {
    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl IndicatorsCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        let indicators = client.indicators().await.context("loading indicators")?;

        match self.format {
            OutputFormat::Table => {
                println!("\nIndicators ({} available):", indicators.len());
                println!("{:-<80}", "");
                for indicator in &indicators {
                    if indicator.name == indicator.code {
                        println!("{}", indicator.name);
                    } else {
                        println!("{:<24} {}", indicator.code, indicator.name);
                    }
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&indicators)?),
            OutputFormat::Csv => {
                println!("code,name");
                for indicator in &indicators {
                    println!("{},{}", csv_field(&indicator.code), csv_field(&indicator.name));
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct OptionsCommand {
    /// Indicator code
    #[arg(short, long)]
    pub indicator: String,

    /// Group the data by country or by year
    #[arg(short = 't', long = "type", value_enum)]
    pub group_by: GroupBy,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

impl OptionsCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        let query = OptionsQuery {
            indicator: self.indicator,
            group_by: self.group_by,
        };
        let options = client.options(&query).await.context("loading options")?;
        info!("{} options for {} / {}", options.len(), query.indicator, query.group_by);

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&options)?),
            OutputFormat::Table | OutputFormat::Csv => {
                for option in &options {
                    println!("{}", option);
                }
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct ShowCommand {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Sort rows by this column
    #[arg(long, value_enum)]
    pub sort: Option<SortColumn>,

    /// Sort descending instead of ascending
    #[arg(long, requires = "sort")]
    pub desc: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Draw the result set below the table
    #[arg(long)]
    pub plot: bool,
}

impl ShowCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        let query = self.selection.query();
        let mut rows = client.data(&query).await.context("loading results")?;

        let mut sort = SortState::default();
        if let Some(column) = self.sort {
            sort.click(column);
            if self.desc {
                sort.click(column);
            }
            rows = sort_rows(rows, column, !self.desc);
        }

        match self.format {
            OutputFormat::Table => print_table(&rows, &sort),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
            OutputFormat::Csv => {
                println!("country,date,value");
                for row in &rows {
                    println!(
                        "{},{},{}",
                        csv_field(&row.country),
                        csv_field(&row.date),
                        csv_number(row.value)
                    );
                }
            }
        }

        if self.plot {
            let plotter = ResultPlotter::new(config.plot_width, config.plot_height);
            println!("\n{}", plotter.plot(&rows, query.group_by, &query.option));
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct DownloadCommand {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Directory to save into (defaults to the configured download_dir)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl DownloadCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        let dest = self.out.unwrap_or_else(|| config.download_dir.clone());

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg} [{elapsed_precise}] {bytes}")?,
        );
        spinner.set_message(format!(
            "Downloading {} / {}",
            self.selection.indicator, self.selection.option
        ));
        spinner.enable_steady_tick(Duration::from_millis(100));

        let result = client
            .download_csv(&self.selection.query(), &dest, |written| spinner.set_position(written))
            .await;

        match result {
            Ok(path) => {
                spinner.finish_with_message(format!("💾 Saved {}", path.display()));
                Ok(())
            }
            Err(e) => {
                spinner.abandon_with_message("Download failed");
                Err(e).context("downloading CSV")
            }
        }
    }
}

#[derive(Args)]
pub struct GraphCommand {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

impl GraphCommand {
    pub async fn execute(self, config: Config) -> Result<()> {
        let client = BackendClient::new(&config)?;
        match client.interactive_graph(&self.selection.query()).await {
            Ok(body) => {
                info!("Interactive graph generated");
                if !body.trim().is_empty() {
                    println!("{}", body.trim());
                }
            }
            // The graph is rendered server-side; a failed request is only logged
            Err(e) => warn!("There was a problem with the interactive graph request: {}", e),
        }
        Ok(())
    }
}

/// Print rows as an aligned text table with the active sort arrow
pub(crate) fn print_table(rows: &[ResultRow], sort: &SortState) {
    let country_width = rows
        .iter()
        .map(|r| r.country.chars().count())
        .max()
        .unwrap_or(0)
        .max(SortColumn::Country.title().len() + 2);
    let date_width = rows
        .iter()
        .map(|r| r.date.len())
        .max()
        .unwrap_or(0)
        .max(SortColumn::Date.title().len() + 2);
    let value_width = 18;

    let header = |c: SortColumn| format!("{}{}", c.title(), sort.arrow(c));
    println!(
        "\n{:<cw$} {:<dw$} {:>vw$}",
        header(SortColumn::Country),
        header(SortColumn::Date),
        header(SortColumn::Value),
        cw = country_width,
        dw = date_width,
        vw = value_width
    );
    println!("{:-<width$}", "", width = country_width + date_width + value_width + 2);

    for row in rows {
        println!(
            "{:<cw$} {:<dw$} {:>vw$}",
            row.country,
            row.date,
            format_value(row.value),
            cw = country_width,
            dw = date_width,
            vw = value_width
        );
    }
    println!("({} rows)", rows.len());
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_number(value: f64) -> String {
    if value.is_finite() {
        value.to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("Kenya"), "Kenya");
        assert_eq!(csv_field("Korea, Rep."), "\"Korea, Rep.\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_number() {
        assert_eq!(csv_number(1.5), "1.5");
        assert_eq!(csv_number(f64::NAN), "");
    }

    #[test]
    fn test_selection_args_query() {
        let args = SelectionArgs {
            indicator: "SP.POP.TOTL".into(),
            group_by: GroupBy::Year,
            option: "2020".into(),
        };
        assert_eq!(
            args.query(),
            DataQuery {
                indicator: "SP.POP.TOTL".into(),
                group_by: GroupBy::Year,
                option: "2020".into(),
            }
        );
    }
}
