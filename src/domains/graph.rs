//! 实体图调查：人物 ↔ 地点
//!
//! 两个对称的有向关系：人物 -> 到过的地点（/people，只接受名），地点 -> 到过的人（/places）。
//! 每个实体只能查询一次；查询结果中新出现的名字作为未查询实体加入对侧登记表。
//! answer 动作把城市名提交给校验方，响应含哨兵即结束。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::GraphSection;
use crate::core::AgentError;
use crate::hub::HubClient;
use crate::knowledge::{first_token, normalize, KnowledgeState, Registry};
use crate::react::{decode_json, ActionKind, Decision, ToolResult, Toolset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    /// 人物 -> 地点
    People,
    /// 地点 -> 人物
    Places,
}

impl Relation {
    fn label(self) -> &'static str {
        match self {
            Relation::People => "person",
            Relation::Places => "place",
        }
    }

    /// 返回的名字属于哪一侧
    fn opposite(self) -> Relation {
        match self {
            Relation::People => Relation::Places,
            Relation::Places => Relation::People,
        }
    }

    /// 该侧 key 的规范化方式：人物只保留名
    fn key_of(self, raw: &str) -> String {
        match self {
            Relation::People => first_token(raw),
            Relation::Places => normalize(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphAction {
    Query { relation: Relation, key: String },
    Answer { city: String },
    Reason,
}

impl ActionKind for GraphAction {
    fn tag(&self) -> &'static str {
        match self {
            GraphAction::Query {
                relation: Relation::People,
                ..
            } => "ask_people",
            GraphAction::Query {
                relation: Relation::Places,
                ..
            } => "ask_places",
            GraphAction::Answer { .. } => "answer",
            GraphAction::Reason => "reason",
        }
    }

    fn describe(&self) -> String {
        match self {
            GraphAction::Query { relation, key } => format!("query {} {}", relation.label(), key),
            GraphAction::Answer { city } => format!("answer {}", city),
            GraphAction::Reason => "reason".to_string(),
        }
    }

    fn submitted_answer(&self) -> Option<String> {
        match self {
            GraphAction::Answer { city } => Some(city.clone()),
            _ => None,
        }
    }
}

/// Oracle 输出的原始 JSON
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawGraphDecision {
    /// "ask_people" | "ask_places" | "reason" | "answer"
    pub action: String,
    /// 要查询的名字或地点（ask_* 时必填）
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub reasoning: String,
    /// 城市名（answer 时必填）
    #[serde(default)]
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub key: String,
    pub links: BTreeSet<String>,
    pub queried: bool,
}

impl Entity {
    fn placeholder(key: &str) -> Self {
        Self {
            key: key.to_string(),
            links: BTreeSet::new(),
            queried: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOutput {
    /// 关系查询返回的名字（已规范化，属于对侧）
    Related(Vec<String>),
    /// 校验方对答案的回复
    Verdict(String),
    Note,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityGraph {
    people: BTreeMap<String, Entity>,
    places: BTreeMap<String, Entity>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn side(&self, relation: Relation) -> &BTreeMap<String, Entity> {
        match relation {
            Relation::People => &self.people,
            Relation::Places => &self.places,
        }
    }

    fn side_mut(&mut self, relation: Relation) -> &mut BTreeMap<String, Entity> {
        match relation {
            Relation::People => &mut self.people,
            Relation::Places => &mut self.places,
        }
    }

    pub fn get(&self, relation: Relation, key: &str) -> Option<&Entity> {
        self.side(relation).get(key)
    }

    pub fn is_queried(&self, relation: Relation, key: &str) -> bool {
        self.get(relation, key).map(|e| e.queried).unwrap_or(false)
    }

    /// 已发现但尚未查询的 key
    pub fn frontier(&self, relation: Relation) -> Vec<&str> {
        self.side(relation)
            .values()
            .filter(|e| !e.queried)
            .map(|e| e.key.as_str())
            .collect()
    }

    fn render_side(out: &mut String, side: &BTreeMap<String, Entity>) {
        let queried: Vec<&Entity> = side.values().filter(|e| e.queried).collect();
        if queried.is_empty() {
            out.push_str("    (none)\n");
        }
        for entity in queried {
            let links: Vec<&str> = entity.links.iter().map(String::as_str).collect();
            let _ = writeln!(out, "    {}: [{}]", entity.key, links.join(", "));
        }
    }
}

impl Registry for EntityGraph {
    type Action = GraphAction;
    type Output = GraphOutput;

    fn apply(&mut self, action: &GraphAction, output: &GraphOutput) -> String {
        match (action, output) {
            (GraphAction::Query { relation, key }, GraphOutput::Related(names)) => {
                let opposite = relation.opposite();
                for name in names {
                    self.side_mut(opposite)
                        .entry(name.clone())
                        .or_insert_with(|| Entity::placeholder(name));
                }
                let entity = self
                    .side_mut(*relation)
                    .entry(key.clone())
                    .or_insert_with(|| Entity::placeholder(key));
                entity.queried = true;
                entity.links = names.iter().cloned().collect();
                if names.is_empty() {
                    format!("queried {} {} -> no data", relation.label(), key)
                } else {
                    format!(
                        "queried {} {} -> {}",
                        relation.label(),
                        key,
                        names.join(", ")
                    )
                }
            }
            (GraphAction::Answer { city }, GraphOutput::Verdict(message)) => {
                format!("answered {} -> {}", city, message)
            }
            (action, _) => format!("analysis ({})", action.describe()),
        }
    }

    fn render(&self) -> String {
        let mut out = String::from("connections:\n  people_to_places:\n");
        Self::render_side(&mut out, &self.people);
        out.push_str("  places_to_people:\n");
        Self::render_side(&mut out, &self.places);
        let _ = writeln!(
            out,
            "discovered_unqueried:\n  people: [{}]\n  places: [{}]",
            self.frontier(Relation::People).join(", "),
            self.frontier(Relation::Places).join(", ")
        );
        out
    }
}

/// 把关系查询的回复切分成规范化名字；跳过 "[**RESTRICTED DATA**]" 之类的非名字片段
pub fn parse_related(message: &str, relation: Relation) -> Vec<String> {
    let mut seen = BTreeSet::new();
    message
        .split_whitespace()
        .map(|token| relation.key_of(token))
        .filter(|key| !key.is_empty() && !key.contains(['[', ']', '*']))
        .filter(|key| seen.insert(key.clone()))
        .collect()
}

pub struct GraphToolset {
    hub: Arc<dyn HubClient>,
    section: GraphSection,
}

impl GraphToolset {
    pub fn new(hub: Arc<dyn HubClient>, section: GraphSection) -> Self {
        Self { hub, section }
    }

    fn endpoint(&self, relation: Relation) -> &str {
        match relation {
            Relation::People => &self.section.people_endpoint,
            Relation::Places => &self.section.places_endpoint,
        }
    }
}

#[async_trait]
impl Toolset for GraphToolset {
    type Action = GraphAction;
    type Output = GraphOutput;
    type Registry = EntityGraph;

    fn name(&self) -> &'static str {
        "graph"
    }

    fn goal(&self) -> String {
        self.section.goal.clone()
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are a detective investigating a missing person's location. You have access to these tools:
1. ask_people - returns places visited by a person (input: FIRST NAME ONLY, uppercase, without Polish diacritics)
2. ask_places - returns people who visited a place (input: place name, uppercase, without diacritics)
3. reason - analyze the collected information and plan next steps, no tool is called
4. answer - submit the city where the person is staying

RULES ABOUT DATA ACCESS:
- Every person and every place can be queried ONCE in the entire investigation. There is no way to get more data about an already queried entity.
- RESTRICTED DATA means there is no way to get that information.
- CITY NAMES are PLACES.
- Focus on the discovered_unqueried section, these are your opportunities for new information.
- Never answer with a city listed in rejected_answers.
- Names must be uppercase without Polish diacritics (ą->a, ć->c, ę->e, ł->l, ń->n, ó->o, ś->s, ź/ż->z), e.g. JOZEF, LUKASZ.
- When you have a theory, do not hesitate to answer; each wrong answer narrows the possibilities.

Return exactly one JSON object matching this schema, without markdown or any other text:
{}"#,
            super::decision_schema::<RawGraphDecision>()
        )
    }

    fn answer_action(&self) -> &'static str {
        "answer"
    }

    async fn bootstrap(&self) -> Result<KnowledgeState<EntityGraph>, AgentError> {
        let url = self.hub.url_for(&self.section.note_path);
        tracing::info!(url = %url, "downloading investigation note");
        let note = self
            .hub
            .fetch_text(&url)
            .await
            .map_err(|e| AgentError::Bootstrap(format!("note {}: {}", url, e)))?;
        tracing::info!(bytes = note.len(), "note downloaded");
        Ok(KnowledgeState::new(EntityGraph::new()).with_seed("note", note))
    }

    fn decode(&self, raw: &str) -> Result<Decision<GraphAction>, AgentError> {
        let parsed: RawGraphDecision = decode_json(raw)?;
        let action = match parsed.action.trim().to_lowercase().as_str() {
            "ask_people" => Relation::People,
            "ask_places" => Relation::Places,
            "reason" => {
                return Ok(Decision::new(GraphAction::Reason, parsed.reasoning));
            }
            "answer" => {
                let city = normalize(&parsed.answer);
                if city.is_empty() {
                    return Err(AgentError::invalid("answer", "missing answer"));
                }
                return Ok(Decision::new(GraphAction::Answer { city: city.clone() }, parsed.reasoning)
                    .with_candidate(Some(city)));
            }
            other => return Err(AgentError::UnknownAction(other.to_string())),
        };
        let key = action.key_of(&parsed.query);
        if key.is_empty() {
            return Err(AgentError::invalid(parsed.action, "missing query"));
        }
        Ok(Decision::new(
            GraphAction::Query {
                relation: action,
                key,
            },
            parsed.reasoning,
        ))
    }

    fn skip_reason(&self, action: &GraphAction, registry: &EntityGraph) -> Option<String> {
        match action {
            GraphAction::Query { relation, key } if registry.is_queried(*relation, key) => {
                Some(format!("{} {} was already queried", relation.label(), key))
            }
            _ => None,
        }
    }

    async fn invoke(
        &self,
        decision: &Decision<GraphAction>,
        _registry: &EntityGraph,
    ) -> Result<ToolResult<GraphOutput>, AgentError> {
        match &decision.action {
            GraphAction::Query { relation, key } => {
                let reply = self.hub.query(self.endpoint(*relation), key).await?;
                let names = parse_related(&reply.message, relation.opposite());
                tracing::debug!(key = %key, found = names.len(), "relation lookup");
                Ok(ToolResult::new(reply.raw, GraphOutput::Related(names)))
            }
            GraphAction::Answer { city } => {
                let reply = self
                    .hub
                    .report(&self.section.task, serde_json::Value::String(city.clone()))
                    .await?;
                Ok(ToolResult::new(reply.raw, GraphOutput::Verdict(reply.message))
                    .with_submitted(city.clone()))
            }
            GraphAction::Reason => Ok(ToolResult::new("", GraphOutput::Note)),
        }
    }
}
