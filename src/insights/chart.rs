/// Best-effort presentation hint derived from the question's wording.
/// Advisory metadata only; callers may ignore it entirely.
pub fn infer_chart_type(question: &str) -> &'static str {
    let q = question.to_lowercase();
    const PIE: &[&str] = &["share", "proportion", "percent", "distribution", "breakdown"];
    const LINE: &[&str] = &[
        "trend", "over time", "dynamic", "by day", "by month", "by week", "per day", "per month",
        "daily", "weekly", "monthly",
    ];
    if PIE.iter().any(|kw| q.contains(kw)) {
        return "pie";
    }
    if LINE.iter().any(|kw| q.contains(kw)) {
        return "line";
    }
    "bar"
}
