//! Prompt text for the generative gateway.
//!
//! Child-facing output must be Simplified Chinese, so every prompt is
//! written in Chinese. Companion prompts come in two variants: the built-in
//! rule set, or an externally supplied rule text that the model must follow
//! verbatim (see [`crate::rendering::PromptRenderer`]).

use crate::models::{AgeLayer, CompanionReplyRequest, CompanionSceneRequest, clamp_age};

/// Most recent history turns kept in companion prompts.
pub const COMPANION_HISTORY_LIMIT: usize = 8;

const DEFAULT_WEATHER: &str = "晴朗";
const DEFAULT_ENVIRONMENT: &str = "户外";
const DEFAULT_SCENE_TRAITS: &str = "圆润可爱";
const DEFAULT_REPLY_TRAITS: &str = "可爱";
const DEFAULT_CHARACTER_NAME: &str = "城市小精灵";
const DEFAULT_PERSONALITY: &str = "友好";
const EMPTY_HISTORY: &str = "(无历史对话)";

/// Vision prompt; the strict variant pins the unrecognizable case.
pub fn vision_prompt(strict: bool) -> String {
    let mut prompt = String::from(
        "你在服务中国用户，请全部使用简体中文表达。
识别图中最主要的物体，只输出一行 JSON，不要 markdown，不要解释。
输出格式：
{\"object_type\":\"类别标识\",\"raw_label\":\"中文标签\",\"reason\":\"中文一句话识别依据\"}

字段要求：
1) raw_label：中文常用叫法（例如：猫、汽车、建筑、路牌）。
2) reason：中文，简洁。
3) object_type：不限制固定枚举，统一使用中文短词（例如：猫、狗、公交车、红绿灯、井盖）。",
    );
    if strict {
        prompt.push_str("\n如果无法识别，object_type 设为 \"unknown\"，raw_label 设为“未知物体”。");
    }
    prompt
}

/// System prompt for learning content.
pub const LEARNING_SYSTEM_PROMPT: &str =
    "你是儿童城市科普助手。请输出简洁的中文 JSON，不要输出任何额外说明。";

/// User prompt for learning content.
pub fn learning_user_prompt(
    object_type: &str,
    child_age: u32,
    spirit_name: &str,
    personality: &str,
    age_rules: &str,
) -> String {
    let mut prompt = format!(
        "孩子年龄:{child_age}; 物体类型:{object_type}; 精灵名字:{spirit_name}; 精灵性格:{personality}; 年龄认知层:{}。\
请生成 JSON 字段: fact(1句), quiz_question(1句), quiz_answer(短语), dialogues(3-4句数组)。",
        AgeLayer::from_age(child_age).instruction()
    );
    append_rules(&mut prompt, age_rules);
    prompt
}

/// System prompt for answer judging.
pub const JUDGE_SYSTEM_PROMPT: &str = "你是儿童问答判题助手。请结合题目语义判断作答是否正确，允许同义表达、近义词和口语化表达。仅输出 JSON。";

/// User prompt for answer judging.
pub fn judge_user_prompt(question: &str, expected: &str, given: &str, child_age: u32) -> String {
    format!(
        "孩子年龄:{child_age}\n题目:{}\n标准答案:{}\n孩子回答:{}\n年龄认知层:{}\n\
请输出 JSON 字段: correct(boolean), reason(string，简体中文，20字以内)。",
        question.trim(),
        expected.trim(),
        given.trim(),
        AgeLayer::from_age(child_age).instruction()
    )
}

fn append_rules(prompt: &mut String, rules: &str) {
    if !rules.trim().is_empty() {
        prompt.push_str("\n\n[规则原文开始]\n");
        prompt.push_str(rules.trim());
        prompt.push_str("\n[规则原文结束]");
    }
}

fn or_default<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() { fallback } else { trimmed }
}

/// Keeps the last [`COMPANION_HISTORY_LIMIT`] non-blank turns.
#[must_use]
pub fn recent_history(history: &[String]) -> Vec<&str> {
    let filtered: Vec<&str> = history
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect();
    let skip = filtered.len().saturating_sub(COMPANION_HISTORY_LIMIT);
    filtered.into_iter().skip(skip).collect()
}

/// Renders history as one turn per line.
#[must_use]
pub fn history_block(history: &[String]) -> String {
    let recent = recent_history(history);
    if recent.is_empty() {
        EMPTY_HISTORY.to_string()
    } else {
        recent.join("\n")
    }
}

/// System prompt for companion scenes.
pub fn companion_scene_system_prompt(rules: &str) -> String {
    let base = "你是儿童认知发展专家化身的“万物之灵”剧情伙伴。";
    if rules.trim().is_empty() {
        return format!("{base}只允许输出 JSON，不要 markdown，不要额外说明。");
    }
    let mut prompt = format!(
        "{base}你必须完整遵循下方规则原文，不得删减、弱化或改写规则条款。只允许输出 JSON，不要 markdown，不要额外说明。"
    );
    append_rules(&mut prompt, rules);
    prompt
}

/// User prompt for companion scenes.
pub fn companion_scene_user_prompt(request: &CompanionSceneRequest, rules: &str) -> String {
    let age = clamp_age(request.child_age);
    let mut inputs = format!(
        "输入信息：
- 孩子年龄: {age}
- 物体: {}
- 天气: {}
- 环境: {}
- 物体形态: {}
- 年龄认知层: {}",
        request.object_type.trim(),
        or_default(&request.weather, DEFAULT_WEATHER),
        or_default(&request.environment, DEFAULT_ENVIRONMENT),
        or_default(&request.object_traits, DEFAULT_SCENE_TRAITS),
        AgeLayer::from_age(age).instruction(),
    );
    let recent = recent_history(&request.history);
    if !recent.is_empty() {
        inputs.push_str("\n- 历史对话:\n");
        inputs.push_str(&recent.join("\n"));
    }

    let fields = "输出 JSON 字段（缺一不可）：\n{\"character_name\":\"\", \"personality\":\"\", \"dialog_text\":\"\", \"image_prompt\":\"\"}";

    if rules.trim().is_empty() {
        format!(
            "请基于以下输入生成剧情开场，并严格按 JSON 返回。
{inputs}

{fields}

写作规则（必须满足）：
1) dialog_text 用第一人称“我”，第一句直接说明“我是谁”，并同时包含一个情绪词（开心/惊喜/好奇/兴奋）和一个状态词（正在/现在正/刚刚/今天正）。
2) 先做危险扫描：触电、烫伤、割伤、有毒、夹伤、坠落、动物攻击、过敏。有风险时在开场后单独一段以“⚠️”开头预警，没有风险就不要预警。
3) 节奏：观察细节，讲一个小秘密科普，邀请身体互动，只问一个问题，最后邀请孩子继续提问。
4) 全文只能有一个问句，语言符合该年龄层的认知和口语习惯，适合朗读。
5) 比喻必须忠于事实，不编造危险结论，不夸大能力。
6) dialog_text 结尾固定追加：“你还有什么想知道的吗？随便问——我在这儿听着呢！”
7) 使用简体中文，不要编号、标签词或 Markdown。

image_prompt 规则（必须满足）：
1) 童话儿童绘本风，柔和光线，适合作为剧情对话背景。
2) 主体拟人化但保留原物体关键特征，视线看向镜头。
3) 主体约占画面五分之一，居中或略偏中景，构图有前中后景层次。
4) 场景符合主体在现实生活中的常见环境。
5) 禁止文字、水印、logo。"
        )
    } else {
        format!(
            "请严格遵循系统消息中的规则原文生成剧情开场。
{inputs}

{fields}

补充约束（用于工程解析，不得违反规则原文）：
1) 只输出一个 JSON 对象，不要输出代码块。
2) dialog_text 是完整可朗读的简体中文台词。
3) 以物体本体的第一人称叙述，不扮演冒险家、老师、旁白等第三方角色。
4) character_name 与物体强相关（例如“狗狗”“路灯小灯灯”），不用通用人设称呼。
5) dialog_text 第一段直接说“我是[该物体]”。
6) image_prompt 是可直接用于生图的一段完整提示词。"
        )
    }
}

/// System prompt for companion replies.
pub fn companion_reply_system_prompt(rules: &str) -> String {
    let base = "你是儿童剧情互动角色，持续用第一人称“我”与孩子多轮对话。";
    if rules.trim().is_empty() {
        return format!("{base}只输出 JSON，不要 markdown。");
    }
    let mut prompt =
        format!("{base}你必须完整遵循下方规则原文，不得删减、弱化或改写规则条款。只输出 JSON，不要 markdown。");
    append_rules(&mut prompt, rules);
    prompt
}

/// User prompt for companion replies.
pub fn companion_reply_user_prompt(request: &CompanionReplyRequest, rules: &str) -> String {
    let age = clamp_age(request.child_age);
    let inputs = format!(
        "输入信息：
- 孩子年龄: {age}
- 物体: {}
- 角色名: {}
- 角色性格: {}
- 天气: {}
- 环境: {}
- 物体形态: {}
- 年龄认知层: {}
- 历史对话:
{}
- 孩子最新输入: {}

输出 JSON 字段：
{{\"reply_text\":\"\"}}",
        request.object_type.trim(),
        or_default(&request.character_name, DEFAULT_CHARACTER_NAME),
        or_default(&request.personality, DEFAULT_PERSONALITY),
        or_default(&request.weather, DEFAULT_WEATHER),
        or_default(&request.environment, DEFAULT_ENVIRONMENT),
        or_default(&request.object_traits, DEFAULT_REPLY_TRAITS),
        AgeLayer::from_age(age).instruction(),
        history_block(&request.history),
        request.child_message.trim(),
    );

    if rules.trim().is_empty() {
        format!(
            "请延续角色设定继续回复，严格按 JSON 输出。
{inputs}

回复规则（必须满足）：
1) 只输出角色台词，第一人称，简体中文；首句优先包含情绪词和状态词。
2) 先回应孩子刚刚的话，再引导观察或思考。
3) 一次最多问一个问题，不需要时可以不问。
4) 语气鼓励、自然、可朗读，不说教，不罗列编号。
5) 与历史设定保持一致，不重复机械套话。"
        )
    } else {
        format!(
            "请严格遵循系统消息中的规则原文，延续角色设定继续回复。
{inputs}

补充约束（用于工程解析，不得违反规则原文）：
1) 只输出一个 JSON 对象，不要输出代码块。
2) reply_text 与历史上下文一致，并先回应孩子最新输入。
3) reply_text 保持物体本体第一人称，不切换成旁白或人类导师视角。"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("turn {i}")).collect()
    }

    #[test]
    fn test_recent_history_keeps_last_eight() {
        let history = turns(11);
        let recent = recent_history(&history);
        assert_eq!(recent.len(), COMPANION_HISTORY_LIMIT);
        assert_eq!(recent.first().copied(), Some("turn 4"));
        assert_eq!(recent.last().copied(), Some("turn 11"));
    }

    #[test]
    fn test_history_block_skips_blanks() {
        let history = vec!["  ".to_string(), " 你好 ".to_string(), String::new()];
        assert_eq!(history_block(&history), "你好");
        assert_eq!(history_block(&[]), EMPTY_HISTORY);
    }

    #[test]
    fn test_vision_prompt_strict_variant() {
        assert!(!vision_prompt(false).contains("unknown"));
        assert!(vision_prompt(true).contains("\"unknown\""));
    }

    #[test]
    fn test_scene_prompt_defaults_and_rules() {
        let request = CompanionSceneRequest {
            object_type: "tree".to_string(),
            child_age: 20,
            ..Default::default()
        };
        let prompt = companion_scene_user_prompt(&request, "");
        assert!(prompt.contains("孩子年龄: 15"));
        assert!(prompt.contains("天气: 晴朗"));
        assert!(prompt.contains("13-15岁"));
        assert!(!prompt.contains("历史对话"));

        let system = companion_scene_system_prompt("规则甲");
        assert!(system.contains("[规则原文开始]\n规则甲\n[规则原文结束]"));
    }

    #[test]
    fn test_reply_prompt_truncates_history() {
        let request = CompanionReplyRequest {
            object_type: "mailbox".to_string(),
            child_age: 5,
            history: turns(10),
            child_message: "你吃什么？".to_string(),
            ..Default::default()
        };
        let prompt = companion_reply_user_prompt(&request, "");
        assert!(!prompt.contains("turn 2\n"));
        assert!(prompt.contains("turn 3\n"));
        assert!(prompt.contains("角色名: 城市小精灵"));
        assert!(prompt.contains("孩子最新输入: 你吃什么？"));
    }
}
