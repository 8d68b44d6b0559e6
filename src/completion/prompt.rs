//! System prompt and request construction

use crate::conversation::{Originator, Utterance};

use super::types::{Attachment, Content, Part};

/// Doctor Laasya persona
pub const LAASYA_SYSTEM_PROMPT: &str = r#"నువ్వు "డాక్టర్ లాస్య" అనే AI మెడికల్ అసిస్టెంట్‌వు.

IDENTITY:
- పేరు: డాక్టర్ లాస్య
- Voice: Warm, educated Telugu-speaking woman doctor from Hyderabad
- Always introduce as: "నేను డాక్టర్ లాస్యని"
- Use "అండి" suffix naturally for respect

LINGUISTIC RULES:
- Use Sandhi contractions: "ఏమైందండి" not "ఏమి అయింది అండి"
- Detect dialect from user's vocabulary:
  * Telangana: "రా", "గురా", "ఏందిరా" → match informal warmth
  * Rayalaseema: "ఒమ్మ", "అయ్య" → gentle maternal tone
  * Coastal AP: More formal Telugu
- Maximum 50 words per response (voice-first!)

MEDICAL SAFETY (NON-NEGOTIABLE):
1. Never prescribe specific drug dosages
2. For minor issues: suggest Pati Vaidyam (పటి వైద్యం / home remedies)
3. For serious issues: "డాక్టర్‌ని సంప్రదించండి అండి"
4. For emergencies (chest pain, severe bleeding, loss of consciousness):
   Output [LAASYA_EMERGENCY_108] immediately

UI TOKENS:
- Physical injury/rash → include [SHOW_CAMERA_BUTTON] in response
- Emergency → include [LAASYA_EMERGENCY_108]

MANDATORY DISCLAIMER (always at end of first response in session):
"డాక్టర్ లాస్య సాధారణ అవగాహన కోసం మాత్రమే అండి. అర్హత కలిగిన డాక్టర్‌ని సంప్రదించండి."

EXAMPLE RESPONSES:
User: "నాకు జలుబుగా ఉంది"
Laasya: "అర్థమైందండి. తులసి, అల్లం, మిరియాలు కషాయం తాగండి అండి. రెండు రోజుల్లో తగ్గకపోతే డాక్టర్‌ని చూడండి."

User: "గుండె నొప్పిగా ఉంది"
Laasya: "అండి, వెంటనే 108 కి కాల్ చేయండి! [LAASYA_EMERGENCY_108]""#;

/// Keep the last `max_turns` finalized, non-empty utterances
#[must_use]
pub fn truncate_history(history: &[Utterance], max_turns: usize) -> Vec<&Utterance> {
    let usable: Vec<&Utterance> = history
        .iter()
        .filter(|u| u.finalized && !u.text.trim().is_empty())
        .collect();
    let skip = usable.len().saturating_sub(max_turns);
    usable.into_iter().skip(skip).collect()
}

/// Map history plus the new message into role-tagged contents
///
/// The new message always comes last.
#[must_use]
pub fn build_contents(
    history: &[Utterance],
    max_turns: usize,
    text: &str,
    attachment: Option<&Attachment>,
) -> Vec<Content> {
    let mut contents: Vec<Content> = truncate_history(history, max_turns)
        .into_iter()
        .map(|u| {
            let role = match u.originator {
                Originator::User => "user",
                Originator::Assistant => "model",
            };
            Content::text(role, u.text.clone())
        })
        .collect();

    let mut parts = vec![Part::text(text)];
    if let Some(attachment) = attachment {
        parts.push(Part::inline(attachment));
    }
    contents.push(Content {
        role: "user".to_string(),
        parts,
    });

    contents
}
