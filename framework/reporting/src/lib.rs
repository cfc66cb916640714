mod aggregate;
mod criteria;
mod export;
mod sink;
mod summary;

pub use aggregate::{AggregateReport, ReportAggregator};
pub use criteria::{Criteria, CriteriaParseError};
pub use export::{ExportFormat, ReportExporter, UnknownExportFormatError};
pub use sink::{JsonlWriter, ReportSink, ReportWriter};
pub use summary::print_summary;
