//! Search command - query the catalog and list matching products.

use clap::Args;
use dhus::SearchQuery;

use super::common::{parse_term, ConnectionArgs};
use crate::error::CliError;

/// Arguments for the search command.
#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Search terms as name:value pairs, e.g. producttype:GRD
    pub terms: Vec<String>,

    /// Restrict results to footprints intersecting a WKT geometry
    #[arg(long, value_name = "WKT")]
    pub area: Option<String>,

    /// Sensing period start (ISO date, YYYYMMDD, or NOW-<n>DAYS)
    #[arg(long, value_name = "DATE")]
    pub begin: Option<String>,

    /// Sensing period end
    #[arg(long, value_name = "DATE")]
    pub end: Option<String>,

    /// Search without a sensing-period clause
    #[arg(long, conflicts_with_all = ["begin", "end"])]
    pub no_date: bool,

    /// Print product ids only, one per line
    #[arg(long)]
    pub ids_only: bool,
}

/// Run the search command.
pub fn run(connection: &ConnectionArgs, args: &SearchArgs) -> Result<(), CliError> {
    let mut query = SearchQuery::new();

    if args.no_date {
        query = query.without_date_range();
    } else if args.begin.is_some() || args.end.is_some() {
        let begin = args.begin.as_deref().unwrap_or("NOW-1DAY");
        let end = args.end.as_deref().unwrap_or("NOW");
        query = query.date_range(begin, end)?;
    }

    if let Some(area) = &args.area {
        query = query.area(area);
    }
    for term in &args.terms {
        let (name, value) = parse_term(term)?;
        query = query.filter(name, value);
    }

    let client = connection.connect()?;
    let products = client.query(&query)?;

    if args.ids_only {
        for id in products.ids() {
            println!("{}", id);
        }
        return Ok(());
    }

    for product in products.iter() {
        let date = product
            .date
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{}  {}  {}", product.id, date, product.title);
    }
    println!(
        "{} product(s) found, total size {:.2} GB",
        products.len(),
        products.total_size_gb()
    );

    Ok(())
}
