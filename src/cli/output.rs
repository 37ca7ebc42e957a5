//! Human-readable table output.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{ContentArrangement, Table};

use crate::domain::models::job::JobRecord;

pub fn format_jobs_table(records: &[JobRecord]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Status", "Mode", "Progress", "Phase", "Created"]);

    for record in records {
        table.add_row(vec![
            record.id.to_string(),
            record.status.as_str().to_string(),
            record.mode.as_str().to_string(),
            format!("{:.0}%", record.progress * 100.0),
            record.current_phase.clone().unwrap_or_else(|| "-".into()),
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        ]);
    }

    table.to_string()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::models::role::{ExecutionMode, Problem};

    #[test]
    fn table_includes_each_job() {
        let record = JobRecord::new(Uuid::new_v4(), ExecutionMode::Single, Problem::new("q"));
        let rendered = format_jobs_table(&[record.clone()]);
        assert!(rendered.contains(&record.id.to_string()));
        assert!(rendered.contains("pending"));
    }
}
