use crate::error::Error;
use chrono::{Datelike, Days, NaiveDate, Utc};
use clap::ValueEnum;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

pub const REPORT_TIME_ZONE: &str = "PacificTimeUSCanadaTijuana";

/// Look back window of the ads dictionary, which ignores the requested range length.
const DICTIONARY_LOOKBACK_DAYS: u32 = 1000;

/// Reports extracted for every account unless a selection is configured.
pub const DEFAULT_REPORTS: [ReportKind; 6] = [
    ReportKind::AdsDictionary,
    ReportKind::AdPerformance,
    ReportKind::KeywordPerformance,
    ReportKind::SearchQueryPerformance,
    ReportKind::GoalsAndFunnels,
    ReportKind::UserLocationPerformance,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Aggregation {
    Summary,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReportFormat {
    Csv,
    Tsv,
    Xml,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Tsv => "tsv",
            ReportFormat::Xml => "xml",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportScope {
    pub account_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaigns: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_groups: Option<Vec<i64>>,
}

impl ReportScope {
    fn account(account_id: i64) -> Self {
        ReportScope {
            account_ids: vec![account_id],
            campaigns: None,
            ad_groups: None,
        }
    }
}

/// Inclusive custom date range of a report, in the report time zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub time_zone: String,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange {
            start,
            end,
            time_zone: REPORT_TIME_ZONE.to_string(),
        }
    }

    /// The `days` long window that closes on `end`, `None` when it starts before the earliest date.
    pub fn ending(end: NaiveDate, days: u32) -> Option<Self> {
        let start = end.checked_sub_days(Days::new(days.into()))?;
        Some(DateRange::new(start, end))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ApiDate {
    day: u32,
    month: u32,
    year: i32,
}

impl From<NaiveDate> for ApiDate {
    fn from(date: NaiveDate) -> Self {
        ApiDate {
            day: date.day(),
            month: date.month(),
            year: date.year(),
        }
    }
}

impl Serialize for DateRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut time = serializer.serialize_struct("ReportTime", 4)?;
        time.serialize_field("CustomDateRangeStart", &ApiDate::from(self.start))?;
        time.serialize_field("CustomDateRangeEnd", &ApiDate::from(self.end))?;
        time.serialize_field("PredefinedTime", &Option::<String>::None)?;
        time.serialize_field("ReportTimeZone", &self.time_zone)?;
        time.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportFlags {
    pub exclude_column_headers: bool,
    pub exclude_report_footer: bool,
    pub exclude_report_header: bool,
    pub return_only_complete_data: bool,
}

impl Default for ReportFlags {
    fn default() -> Self {
        ReportFlags {
            exclude_column_headers: false,
            exclude_report_footer: true,
            exclude_report_header: true,
            return_only_complete_data: false,
        }
    }
}

/// A fully specified request for one report over one account and date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportDefinition {
    #[serde(rename = "Type")]
    pub request_type: &'static str,
    pub report_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Aggregation>,
    pub scope: ReportScope,
    #[serde(rename = "Time")]
    pub date_range: DateRange,
    pub columns: Vec<String>,
    pub format: ReportFormat,
    #[serde(flatten)]
    pub flags: ReportFlags,
}

impl ReportDefinition {
    /// File the downloaded report is written to, `{account_id}_{report_name}_input.{ext}`.
    pub fn result_file_name(&self, account_id: i64) -> String {
        format!(
            "{}_{}_input.{}",
            account_id,
            self.report_name,
            self.format.extension()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportKind {
    AdsDictionary,
    AdPerformance,
    KeywordPerformance,
    SearchQueryPerformance,
    GoalsAndFunnels,
    UserLocationPerformance,
    CampaignPerformance,
    BudgetSummary,
}

impl ReportKind {
    pub fn report_name(self) -> &'static str {
        match self {
            ReportKind::AdsDictionary => "ads_dictionary_report",
            ReportKind::AdPerformance => "ads_performance_report",
            ReportKind::KeywordPerformance => "keyword_performance_report",
            ReportKind::SearchQueryPerformance => "search_query_performance_report",
            ReportKind::GoalsAndFunnels => "goals_funnels_report",
            ReportKind::UserLocationPerformance => "user_location_performance_report",
            ReportKind::CampaignPerformance => "campaign_performance_report",
            ReportKind::BudgetSummary => "budget_summary_report",
        }
    }

    fn request_type(self) -> &'static str {
        match self {
            ReportKind::AdsDictionary | ReportKind::AdPerformance => "AdPerformanceReportRequest",
            ReportKind::KeywordPerformance => "KeywordPerformanceReportRequest",
            ReportKind::SearchQueryPerformance => "SearchQueryPerformanceReportRequest",
            ReportKind::GoalsAndFunnels => "GoalsAndFunnelsReportRequest",
            ReportKind::UserLocationPerformance => "UserLocationPerformanceReportRequest",
            ReportKind::CampaignPerformance => "CampaignPerformanceReportRequest",
            ReportKind::BudgetSummary => "BudgetSummaryReportRequest",
        }
    }

    fn columns(self) -> &'static [&'static str] {
        match self {
            ReportKind::AdsDictionary => ADS_DICTIONARY_COLUMNS,
            ReportKind::AdPerformance => AD_PERFORMANCE_COLUMNS,
            ReportKind::KeywordPerformance => KEYWORD_PERFORMANCE_COLUMNS,
            ReportKind::SearchQueryPerformance => SEARCH_QUERY_PERFORMANCE_COLUMNS,
            ReportKind::GoalsAndFunnels => GOALS_AND_FUNNELS_COLUMNS,
            ReportKind::UserLocationPerformance => USER_LOCATION_PERFORMANCE_COLUMNS,
            ReportKind::CampaignPerformance => CAMPAIGN_PERFORMANCE_COLUMNS,
            ReportKind::BudgetSummary => BUDGET_SUMMARY_COLUMNS,
        }
    }

    fn aggregation(self) -> Option<Aggregation> {
        match self {
            ReportKind::AdsDictionary => Some(Aggregation::Summary),
            // Budget summary requests have no aggregation element.
            ReportKind::BudgetSummary => None,
            _ => Some(Aggregation::Daily),
        }
    }

    /// Builds the request for `account_id` over `date_range`.
    pub fn definition(self, account_id: i64, date_range: &DateRange) -> ReportDefinition {
        let date_range = match self {
            ReportKind::AdsDictionary => DateRange::ending(date_range.end, DICTIONARY_LOOKBACK_DAYS)
                .unwrap_or_else(|| DateRange::new(NaiveDate::MIN, date_range.end)),
            _ => date_range.clone(),
        };

        ReportDefinition {
            request_type: self.request_type(),
            report_name: self.report_name().to_string(),
            aggregation: self.aggregation(),
            scope: ReportScope::account(account_id),
            date_range,
            columns: self.columns().iter().map(|c| c.to_string()).collect(),
            format: ReportFormat::Csv,
            flags: ReportFlags::default(),
        }
    }
}

/// Range ending `days_skip` days before yesterday and starting `days_back` days earlier.
pub fn custom_dates(today: NaiveDate, days_back: u32, days_skip: u32) -> Result<DateRange, Error> {
    today
        .checked_sub_days(Days::new(1 + u64::from(days_skip)))
        .and_then(|end| DateRange::ending(end, days_back))
        .ok_or(Error::InvalidDateRange {
            days_back,
            days_skip,
        })
}

pub fn get_custom_dates(days_back: u32, days_skip: u32) -> Result<DateRange, Error> {
    custom_dates(Utc::now().date_naive(), days_back, days_skip)
}

const BUDGET_SUMMARY_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "CampaignName", "CampaignId", "Date",
    "CurrencyCode", "MonthlyBudget", "DailySpend", "MonthToDateSpend",
];

const CAMPAIGN_PERFORMANCE_COLUMNS: &[&str] = &[
    "TimePeriod", "CampaignId", "CampaignName", "DeviceType", "Network", "Impressions",
    "Clicks", "Spend",
];

const SEARCH_QUERY_PERFORMANCE_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "TimePeriod", "CampaignName", "CampaignId",
    "AdGroupName", "AdGroupId", "AdId", "AdType", "DestinationUrl", "BidMatchType",
    "DeliveredMatchType", "CampaignStatus", "AdStatus", "Impressions", "Clicks", "AverageCpc",
    "Spend", "AveragePosition", "SearchQuery", "Keyword", "AdGroupCriterionId", "Conversions",
    "CostPerConversion", "Language", "KeywordId", "Network", "TopVsOther", "DeviceType",
    "DeviceOS", "Assists", "Revenue", "ReturnOnAdSpend", "CostPerAssist",
    "RevenuePerConversion", "RevenuePerAssist", "AccountStatus", "AdGroupStatus",
    "KeywordStatus", "CampaignType", "CustomerId", "CustomerName", "AllConversions",
    "AllRevenue", "AllCostPerConversion", "AllReturnOnAdSpend", "AllRevenuePerConversion",
];

const KEYWORD_PERFORMANCE_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "TimePeriod", "CampaignName", "CampaignId",
    "AdGroupName", "AdGroupId", "Keyword", "KeywordId", "AdId", "AdType", "DestinationUrl",
    "CurrentMaxCpc", "CurrencyCode", "DeliveredMatchType", "AdDistribution", "Impressions",
    "Clicks", "AverageCpc", "Spend", "AveragePosition", "Conversions", "CostPerConversion",
    "BidMatchType", "DeviceType", "QualityScore", "ExpectedCtr", "AdRelevance",
    "LandingPageExperience", "Language", "HistoricalQualityScore", "HistoricalExpectedCtr",
    "HistoricalAdRelevance", "HistoricalLandingPageExperience", "QualityImpact",
    "CampaignStatus", "AccountStatus", "AdGroupStatus", "KeywordStatus", "Network",
    "TopVsOther", "DeviceOS", "Assists", "Revenue", "ReturnOnAdSpend", "CostPerAssist",
    "RevenuePerConversion", "RevenuePerAssist", "TrackingTemplate", "CustomParameters",
    "FinalUrl", "FinalMobileUrl", "FinalAppUrl", "BidStrategyType", "KeywordLabels",
    "Mainline1Bid", "MainlineBid", "FirstPageBid", "FinalUrlSuffix", "BaseCampaignId",
    "AllConversions", "AllRevenue", "AllCostPerConversion", "AllReturnOnAdSpend",
    "AllRevenuePerConversion",
];

const USER_LOCATION_PERFORMANCE_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "TimePeriod", "CampaignName", "CampaignId",
    "AdGroupName", "AdGroupId", "Country", "State", "MetroArea", "AdDistribution",
    "Impressions", "Clicks", "AverageCpc", "Spend", "AveragePosition",
    "ProximityTargetLocation", "Radius", "Language", "City", "QueryIntentCountry",
    "QueryIntentState", "QueryIntentCity", "QueryIntentDMA", "BidMatchType",
    "DeliveredMatchType", "Network", "TopVsOther", "DeviceType", "DeviceOS", "Assists",
    "Conversions", "Revenue", "ReturnOnAdSpend", "CostPerConversion", "CostPerAssist",
    "RevenuePerConversion", "RevenuePerAssist", "County", "PostalCode", "QueryIntentCounty",
    "QueryIntentPostalCode", "LocationId", "QueryIntentLocationId", "AllConversions",
    "AllRevenue", "AllCostPerConversion", "AllReturnOnAdSpend", "AllRevenuePerConversion",
];

const GOALS_AND_FUNNELS_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "TimePeriod", "CampaignName", "CampaignId",
    "AdGroupName", "AdGroupId", "Keyword", "KeywordId", "Goal", "AllConversions", "Assists",
    "AllRevenue", "GoalId", "DeviceType", "DeviceOS", "AccountStatus", "CampaignStatus",
    "AdGroupStatus", "KeywordStatus", "GoalType",
];

const AD_PERFORMANCE_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "TimePeriod", "CampaignName", "CampaignId",
    "AdGroupName", "AdId", "AdGroupId", "AdTitle", "AdDescription", "AdDescription2", "AdType",
    "AdDistribution", "Impressions", "Clicks", "AverageCpc", "Spend", "AveragePosition",
    "Conversions", "CostPerConversion", "DestinationUrl", "DeviceType", "Language",
    "DisplayUrl", "AdStatus", "Network", "TopVsOther", "BidMatchType", "DeliveredMatchType",
    "DeviceOS", "Assists", "Revenue", "ReturnOnAdSpend", "CostPerAssist",
    "RevenuePerConversion", "RevenuePerAssist", "TrackingTemplate", "CustomParameters",
    "FinalUrl", "FinalMobileUrl", "FinalAppUrl", "AccountStatus", "CampaignStatus",
    "AdGroupStatus", "TitlePart1", "TitlePart2", "TitlePart3", "Headline", "LongHeadline",
    "BusinessName", "Path1", "Path2", "AdLabels", "CustomerId", "CustomerName", "CampaignType",
    "BaseCampaignId", "AllConversions", "AllRevenue", "AllCostPerConversion",
    "AllReturnOnAdSpend", "AllRevenuePerConversion", "FinalUrlSuffix",
];

const ADS_DICTIONARY_COLUMNS: &[&str] = &[
    "AccountName", "AccountNumber", "AccountId", "CampaignName", "CampaignId", "AdGroupName",
    "AdId", "AdGroupId", "AdTitle", "AdDescription", "AdDescription2", "AdType",
    "AdDistribution", "Impressions", "DestinationUrl", "DisplayUrl", "AdStatus",
    "TrackingTemplate", "CustomParameters", "FinalUrl", "FinalMobileUrl", "FinalAppUrl",
    "AccountStatus", "CampaignStatus", "AdGroupStatus", "TitlePart1", "TitlePart2",
    "TitlePart3", "Headline", "LongHeadline", "BusinessName", "Path1", "Path2", "CustomerId",
    "CustomerName", "CampaignType", "BaseCampaignId", "FinalUrlSuffix",
];
