use crate::cli::ExportArgs;
use crate::context::AppContext;
use crate::error::Result;
use crate::export::{self, ExportFilters};
use crate::output;

pub async fn run(ctx: &AppContext, args: ExportArgs) -> Result<()> {
    if !args.output.exists() {
        std::fs::create_dir_all(&args.output)?;
    }

    let filters = ExportFilters {
        month: args.month,
        year: args.year,
        start_date: args.start_date,
        end_date: args.end_date,
    };
    let path = export::download(&ctx.client, args.kind, args.format, &filters, &args.output).await?;

    output::print_message(&format!("Saved {} to {}", args.kind.label(), path.display()));
    Ok(())
}
