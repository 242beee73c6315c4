pub fn user_event_title(headlines_json: &str) -> String {
    format!(r#"You'll receive the headlines of several articles covering the same event.
Write one neutral headline for the event.

HEADLINES JSON:
<{json}>

CONSTRAINTS:
- 6–12 words, title case.
- Name the main subject and action.
- No dates, times, outlet names or loaded adjectives.
- Reply with the headline only."#, json = headlines_json)
}
