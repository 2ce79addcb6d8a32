use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

pub const INDICATOR_PLACEHOLDER: &str = "Select an Indicator";
pub const TYPE_PLACEHOLDER: &str = "Select Type";
pub const OPTION_PLACEHOLDER: &str = "Select an Option";

/// A statistical series offered by the backend. `name` is what the user
/// sees, `code` is what goes over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,
    pub code: String,
}

impl Indicator {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }

    /// Indicator whose display name doubles as its code
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            code: name.clone(),
            name,
        }
    }
}

/// Grouping dimension for an indicator's data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Country,
    Year,
}

impl GroupBy {
    pub const ALL: [GroupBy; 2] = [GroupBy::Country, GroupBy::Year];

    /// Value sent in the `type` query/form field
    pub fn as_param(self) -> &'static str {
        match self {
            GroupBy::Country => "country",
            GroupBy::Year => "year",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GroupBy::Country => "Country",
            GroupBy::Year => "Year",
        }
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionsQuery {
    pub indicator: String,
    pub group_by: GroupBy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataQuery {
    pub indicator: String,
    pub group_by: GroupBy,
    pub option: String,
}

/// Blocking user-facing messages for premature actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    IncompleteBeforeResults,
    ResultsBeforeDownload,
    ResultsBeforeGraph,
    Incomplete,
}

impl Notice {
    pub fn message(self) -> &'static str {
        match self {
            Notice::IncompleteBeforeResults => {
                "Please make sure all selections are made before showing results."
            }
            Notice::ResultsBeforeDownload => "Please show results before downloading CSV.",
            Notice::ResultsBeforeGraph => {
                "Please show results before viewing the interactive graph."
            }
            Notice::Incomplete => "Please make sure all selections are made.",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ChooseIndicator(Indicator),
    ChooseType(GroupBy),
    ChooseOption(String),
    ShowResults,
    DownloadCsv,
    InteractiveGraph,
}

/// Side effects requested by [`update`]; the caller executes them
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchOptions(OptionsQuery),
    FetchData(DataQuery),
    DownloadCsv(DataQuery),
    PostGraph(DataQuery),
    Notify(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NoIndicator,
    IndicatorChosen,
    TypeChosen,
    OptionChosen,
    ResultsShown,
}

/// Everything the user has picked so far
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub indicator: Option<Indicator>,
    pub group_by: Option<GroupBy>,
    pub option: Option<String>,
    pub results_shown: bool,
}

/// Outcome of one [`update`] call
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub selection: Selection,
    pub effects: Vec<Effect>,
}

impl Selection {
    pub fn stage(&self) -> Stage {
        match (&self.indicator, self.group_by, &self.option) {
            (None, _, _) => Stage::NoIndicator,
            (Some(_), None, _) => Stage::IndicatorChosen,
            (Some(_), Some(_), None) => Stage::TypeChosen,
            (Some(_), Some(_), Some(_)) if self.results_shown => Stage::ResultsShown,
            (Some(_), Some(_), Some(_)) => Stage::OptionChosen,
        }
    }

    pub fn options_query(&self) -> Option<OptionsQuery> {
        Some(OptionsQuery {
            indicator: self.indicator.as_ref()?.code.clone(),
            group_by: self.group_by?,
        })
    }

    pub fn data_query(&self) -> Option<DataQuery> {
        Some(DataQuery {
            indicator: self.indicator.as_ref()?.code.clone(),
            group_by: self.group_by?,
            option: self.option.clone()?,
        })
    }

    pub fn indicator_label(&self) -> &str {
        self.indicator.as_ref().map_or(INDICATOR_PLACEHOLDER, |i| i.name.as_str())
    }

    pub fn type_label(&self) -> &str {
        self.group_by.map_or(TYPE_PLACEHOLDER, GroupBy::label)
    }

    pub fn option_label(&self) -> &str {
        self.option.as_deref().unwrap_or(OPTION_PLACEHOLDER)
    }
}

/// Apply one user action to a selection.
///
/// Options are only requested once both indicator and type are known, and
/// every action that needs the full triple reports a [`Notice`] instead of
/// emitting an effect when something is missing.
pub fn update(selection: &Selection, action: Action) -> Transition {
    let mut next = selection.clone();
    let mut effects = Vec::new();

    match action {
        Action::ChooseIndicator(indicator) => {
            debug!("Indicator chosen: {} ({})", indicator.name, indicator.code);
            next.indicator = Some(indicator);
            next.option = None;
            effects.extend(next.options_query().map(Effect::FetchOptions));
        }
        Action::ChooseType(group_by) => {
            debug!("Type chosen: {}", group_by);
            next.group_by = Some(group_by);
            next.option = None;
            effects.extend(next.options_query().map(Effect::FetchOptions));
        }
        Action::ChooseOption(option) => {
            debug!("Option chosen: {}", option);
            next.option = Some(option);
        }
        Action::ShowResults => match next.data_query() {
            Some(query) => {
                next.results_shown = true;
                effects.push(Effect::FetchData(query));
            }
            None => effects.push(Effect::Notify(Notice::IncompleteBeforeResults)),
        },
        Action::DownloadCsv => {
            effects.push(gated(&next, Notice::ResultsBeforeDownload, Effect::DownloadCsv));
        }
        Action::InteractiveGraph => {
            effects.push(gated(&next, Notice::ResultsBeforeGraph, Effect::PostGraph));
        }
    }

    Transition {
        selection: next,
        effects,
    }
}

fn gated(selection: &Selection, not_shown: Notice, effect: fn(DataQuery) -> Effect) -> Effect {
    if !selection.results_shown {
        return Effect::Notify(not_shown);
    }
    match selection.data_query() {
        Some(query) => effect(query),
        None => Effect::Notify(Notice::Incomplete),
    }
}
