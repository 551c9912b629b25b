use preview_core::DeploymentSummary;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }

    let line = |cells: Vec<String>| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{c:width$}", width = widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.iter().map(|h| h.to_string()).collect()));
    println!("{}", line(widths.iter().map(|&w| "-".repeat(w)).collect()));
    for row in rows {
        println!("{}", line(row));
    }
}

/// One deployment, or as JSON.
pub fn print_deployment(d: &DeploymentSummary, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(d);
    }
    println!("id:       {}", d.id);
    println!("status:   {}", d.status.as_str());
    println!("source:   {}", d.source_ref);
    println!("branch:   {}", d.branch);
    println!("url:      {}", d.external_url);
    if let Some(err) = &d.last_error {
        println!("error:    {err}");
    }
    Ok(())
}

pub fn print_deployments(list: &[DeploymentSummary], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&list);
    }
    if list.is_empty() {
        println!("No deployments.");
        return Ok(());
    }
    let rows = list
        .iter()
        .map(|d| {
            vec![
                d.id.clone(),
                d.status.as_str().to_string(),
                d.branch.clone(),
                d.external_url.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "BRANCH", "URL"], rows);
    Ok(())
}
