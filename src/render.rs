// src/render.rs
use crate::blindspot::PriorSource;
use crate::cluster::ClusterState;
use crate::models::Lean;
use crate::out_models::ClusterRecord;

fn lean_line(r: &ClusterRecord) -> String {
    let d = &r.lean_distribution;
    let mut s = format!("left {} · center {} · right {}", d.left, d.center, d.right);
    if d.unknown > 0 {
        s.push_str(&format!(" · unknown {}", d.unknown));
    }
    s
}

fn missing(leans: &[Lean]) -> String {
    leans.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
}

pub fn render_cluster_text(r: &ClusterRecord) -> String {
    let mut out = String::new();
    out.push_str(&format!("### {} ({})\n", r.title_hint.trim(), r.cluster_id));
    out.push_str(&format!(
        "- Sources: {} across {} domains, spanning {:.1}h\n",
        r.metrics.num_sources, r.metrics.distinct_domain_count, r.metrics.time_span_hours
    ));
    out.push_str(&format!("- Lean: {} (entropy {:.2})\n", lean_line(r), r.metrics.lean_entropy));
    if let Some(sim) = r.metrics.top5_similarity_mean {
        out.push_str(&format!("- Recent agreement: {:.2}\n", sim));
    }
    if let Some(b) = &r.blindspot {
        let flag = if b.flagged { "**blindspot**" } else { "balanced" };
        out.push_str(&format!("- Skew: {:.3} ({})", b.skew_score, flag));
        if b.flagged && !b.missing_leans.is_empty() {
            out.push_str(&format!(", no coverage from: {}", missing(&b.missing_leans)));
        }
        out.push('\n');
    }
    if !r.topic_ids.is_empty() {
        out.push_str(&format!("- Topics: {}\n", r.topic_ids.join(", ")));
    }
    if r.status == ClusterState::Dormant {
        out.push_str("- Dormant\n");
    }
    out
}

pub fn render_report_markdown(records: &[ClusterRecord], prior: PriorSource, merged: usize) -> String {
    let mut md = String::new();
    md.push_str("# Event Clusters\n\n");

    let corroborated = records.iter().filter(|r| r.metrics.num_sources >= 2).count();
    let unclustered = records.iter().filter(|r| r.low_confidence).count();
    md.push_str(&format!(
        "{} clusters, {} corroborated, {} unclustered, {} merged. Blindspots scored against the {} prior.\n\n",
        records.len(),
        corroborated,
        unclustered,
        merged,
        match prior {
            PriorSource::Global => "global",
            PriorSource::Personal => "personal",
        }
    ));

    let mut flagged: Vec<&ClusterRecord> = records
        .iter()
        .filter(|r| r.blindspot.as_ref().is_some_and(|b| b.flagged))
        .collect();
    if !flagged.is_empty() {
        flagged.sort_by(|a, b| {
            let sa = a.blindspot.as_ref().map_or(0.0, |x| x.skew_score);
            let sb = b.blindspot.as_ref().map_or(0.0, |x| x.skew_score);
            sb.total_cmp(&sa).then(a.cluster_id.cmp(&b.cluster_id))
        });
        md.push_str("## Blindspots\n");
        for r in &flagged {
            md.push_str(&format!("- **{}**: {}\n", r.title_hint.trim(), lean_line(r)));
        }
        md.push('\n');
    }

    let mut ranked: Vec<&ClusterRecord> = records.iter().filter(|r| !r.low_confidence).collect();
    ranked.sort_by(|a, b| {
        b.metrics
            .num_sources
            .cmp(&a.metrics.num_sources)
            .then(b.metrics.distinct_domain_count.cmp(&a.metrics.distinct_domain_count))
            .then(a.cluster_id.cmp(&b.cluster_id))
    });
    if !ranked.is_empty() {
        md.push_str("## Most Corroborated\n\n");
        for r in ranked {
            md.push_str(&render_cluster_text(r));
            md.push('\n');
        }
    }

    md
}
