use serde_json::Value;

/// Render an export outcome (`{history, result}`) as human-readable text.
pub fn render_export(data: &Value) -> String {
    let history = &data["history"];
    let mut out = String::new();
    if history["success"] == Value::Bool(true) {
        out.push_str(&format!(
            "Export {} complete: {} records, {} bytes in {} ms\n",
            history["export_id"].as_str().unwrap_or("?"),
            history["record_count"],
            history["file_size"],
            history["duration_ms"],
        ));
        if let Some(path) = data["result"]["output_path"].as_str() {
            out.push_str(&format!("  written to {path}\n"));
        }
    } else {
        out.push_str(&format!(
            "Export {} failed: {}\n",
            history["export_id"].as_str().unwrap_or("?"),
            history["error"].as_str().unwrap_or("unknown error"),
        ));
    }
    out
}

/// Render an import outcome (`{history, result}`).
pub fn render_import(data: &Value) -> String {
    let history = &data["history"];
    let result = &data["result"];
    let mut out = String::new();
    let verb = if result["dry_run"] == Value::Bool(true) {
        "Dry-run import"
    } else {
        "Import"
    };
    if history["success"] == Value::Bool(true) {
        out.push_str(&format!(
            "{verb} {}: {} records\n",
            history["import_id"].as_str().unwrap_or("?"),
            history["records_imported"],
        ));
        if let Some(changes) = result["changes"].as_array() {
            for change in changes {
                out.push_str(&format!(
                    "  {} {} {}\n",
                    match change["action"].as_str() {
                        Some("create") => "+",
                        Some("update") => "~",
                        _ => "=",
                    },
                    change["resource_type"].as_str().unwrap_or("?"),
                    change["resource_id"].as_str().unwrap_or("?"),
                ));
            }
        }
    } else {
        out.push_str(&format!(
            "{verb} failed: {}\n",
            history["error"].as_str().unwrap_or("unknown error"),
        ));
    }
    out
}

pub fn render_status(devices: &Value, provisioner: &Value, exports: &Value) -> String {
    let device_count = devices.as_array().map(|a| a.len()).unwrap_or(0);
    let online = devices
        .as_array()
        .map(|a| {
            a.iter()
                .filter(|d| d["status"].as_str() == Some("online"))
                .count()
        })
        .unwrap_or(0);
    format!(
        "Devices:   {device_count} ({online} online)\n\
         Agents:    {}\n\
         Pending:   {} provisioning tasks\n\
         Exports:   {} total, {} failed\n",
        provisioner["agents"],
        provisioner["pending_tasks"],
        exports["total"],
        exports["failed"],
    )
}

pub fn render_schedules(schedules: &Value) -> String {
    let Some(list) = schedules.as_array() else {
        return "No schedules.\n".into();
    };
    if list.is_empty() {
        return "No schedules.\n".into();
    }
    let mut out = String::new();
    for s in list {
        out.push_str(&format!(
            "{:>4}  {:<20} every {:>6}s  {}  next: {}\n",
            s["id"],
            s["name"].as_str().unwrap_or("?"),
            s["interval_seconds"],
            if s["enabled"] == Value::Bool(true) { "enabled " } else { "disabled" },
            s["next_run"].as_str().unwrap_or("-"),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn export_render_success() {
        let data = json!({
            "history": {
                "success": true, "export_id": "abc", "record_count": 3,
                "file_size": 1024, "duration_ms": 12,
            },
            "result": {"output_path": "/data/shelly-archive-x.sma"},
        });
        let text = render_export(&data);
        assert!(text.contains("Export abc complete"));
        assert!(text.contains("/data/shelly-archive-x.sma"));
    }

    #[test]
    fn import_render_lists_changes() {
        let data = json!({
            "history": {"success": true, "import_id": "i1", "records_imported": 2},
            "result": {"dry_run": true, "changes": [
                {"action": "create", "resource_type": "device", "resource_id": "AA:BB"},
                {"action": "skip", "resource_type": "template", "resource_id": "T"},
            ]},
        });
        let text = render_import(&data);
        assert!(text.starts_with("Dry-run import"));
        assert!(text.contains("+ device AA:BB"));
        assert!(text.contains("= template T"));
    }
}
