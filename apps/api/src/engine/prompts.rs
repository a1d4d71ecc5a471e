//! All LLM prompt constants for the extraction stage.
//!
//! The level vocabulary and calibration bands here must stay aligned with
//! `engine::levels`; the cache keys extraction output by `PROMPT_VERSION`,
//! so any change to these strings must bump it.

/// Bumped whenever any prompt below changes, to invalidate cached extractions.
pub const PROMPT_VERSION: &str = "p3";

/// System prompt for JD skill extraction — enforces JSON-only output.
pub const JD_EXTRACTION_SYSTEM: &str = "You are an ATS job-description parser. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// System prompt for resume skill extraction.
pub const RESUME_EXTRACTION_SYSTEM: &str = "You are an expert resume parser. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// All-in-one JD extraction prompt. Replace `{text}` before sending.
pub const JD_ALL_IN_ONE_TEMPLATE: &str = r#"Extract every skill and responsibility from the job description below.

Return a JSON object with this EXACT schema (no extra fields):
{
  "skills": [
    {
      "name": "Python",
      "nice_to_have": false,
      "evidence_spans": [{"start": 120, "end": 150}],
      "evidence_texts": ["5+ years of Python required"],
      "level": {"label": "proficient", "score": 3.0, "years": 5, "confidence": 0.9, "signals": ["explicit years"]}
    }
  ],
  "responsibilities": ["Design RESTful APIs"]
}

Rules:
- Canonicalize names (React -> React.js, Node -> Node.js, GCP -> Google Cloud).
- Set nice_to_have=true when cues like "preferred", "nice to have", "plus", "bonus" apply; otherwise the skill is required.
- level.score reflects REQUIRED proficiency on a 0..4 scale. Do not invent years; only report years that appear in the text.
- level.label is one of: none, basic, working, proficient, advanced.
- Calibrate scores: basic 0.5-1.4, working 1.5-2.4, proficient 2.5-3.4, advanced >= 3.5.
- evidence_texts must be verbatim substrings of the input (max 200 chars each).
- evidence_spans are character offsets into the input text.
- responsibilities are action-led strings, each at most 16 words.

Job description:
{text}"#;

/// All-in-one resume extraction prompt. Replace `{text}` before sending.
pub const RESUME_ALL_IN_ONE_TEMPLATE: &str = r#"Extract every skill and responsibility from the resume below.

Return a JSON object with this EXACT schema (no extra fields):
{
  "skills": [
    {
      "name": "Python",
      "nice_to_have": false,
      "evidence_spans": [{"start": 80, "end": 130}],
      "evidence_texts": ["Built data pipelines in Python for 5 years"],
      "level": {"label": "proficient", "score": 3.0, "years": 5, "confidence": 0.85, "signals": ["explicit years", "built"]}
    }
  ],
  "responsibilities": ["Built data ingestion pipelines"]
}

Rules:
- Canonicalize names (React -> React.js, Node -> Node.js, GCP -> Google Cloud).
- Infer level.score as CANDIDATE proficiency on a 0..4 scale from signals:
  explicit years, ownership verbs ("led", "architected", "built"), scope and
  scale indicators, recency, frequency of use.
- level.label is one of: none, basic, working, proficient, advanced.
- Calibrate scores: basic 0.5-1.4, working 1.5-2.4, proficient 2.5-3.4, advanced >= 3.5.
- Only report years clearly implied by dates in the same section.
- evidence_texts must be verbatim substrings of the input (max 200 chars each).
- evidence_spans are character offsets into the input text.
- responsibilities are action-led strings, each at most 16 words.

Resume:
{text}"#;

/// Legacy two-call mode, first call: skills with levels only.
pub const SKILLS_ONLY_TEMPLATE: &str = r#"Extract every skill from the text below.

Return a JSON object with this EXACT schema (no extra fields):
{
  "skills": [
    {
      "name": "Python",
      "nice_to_have": false,
      "evidence_spans": [],
      "evidence_texts": [],
      "level": {"label": "working", "score": 2.0, "years": null, "confidence": 0.6, "signals": []}
    }
  ]
}

Rules:
- Canonicalize names (React -> React.js, Node -> Node.js, GCP -> Google Cloud).
- level.label is one of: none, basic, working, proficient, advanced; score is 0..4.
- Set nice_to_have=true only for job-description skills marked "preferred", "nice to have", "plus", "bonus".

Text:
{text}"#;

/// Legacy two-call mode, second call: responsibilities only.
pub const RESPONSIBILITIES_TEMPLATE: &str = r#"Extract the responsibilities from the text below.

Return a JSON object with this EXACT schema (no extra fields):
{
  "responsibilities": ["Design RESTful APIs", "Mentor junior engineers"]
}

Rules:
- Each responsibility is an action-led string of at most 16 words.
- Return an empty array if the text lists no responsibilities.

Text:
{text}"#;

/// Appended to the prompt when the previous reply failed JSON validation.
pub const REASK_SUFFIX: &str = "\n\nIMPORTANT: your previous reply was not valid JSON matching \
    the schema above. Respond again with ONLY the JSON object, no prose, no code fences.";
