use crate::builtin::builtin_tools;
use crate::definition::{RiskLevel, ToolCategory, ToolDefinition};
use crate::error::{Result, ToolError};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Immutable table of tool definitions, built once at startup.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    by_name: HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_category: BTreeMap<ToolCategory, usize>,
    pub by_risk_level: BTreeMap<RiskLevel, usize>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<ToolDefinition>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(tools.len());
        for (idx, tool) in tools.iter().enumerate() {
            loom_llm::validate_tool_name(&tool.name)?;
            if by_name.insert(tool.name.clone(), idx).is_some() {
                return Err(ToolError::InvalidArguments(format!(
                    "duplicate tool name: {}",
                    tool.name
                )));
            }
        }
        tracing::debug!(tools = tools.len(), "tool registry built");
        Ok(Self { tools, by_name })
    }

    /// The IDE's built-in tool table.
    pub fn builtin() -> Result<Self> {
        Self::new(builtin_tools())
    }

    pub fn get_all(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ToolDefinition> {
        self.by_name.get(name).map(|&idx| &self.tools[idx])
    }

    pub fn get_by_category(&self, category: ToolCategory) -> Vec<&ToolDefinition> {
        self.tools.iter().filter(|t| t.category == category).collect()
    }

    pub fn get_by_risk_level(&self, level: RiskLevel) -> Vec<&ToolDefinition> {
        self.tools.iter().filter(|t| t.risk_level == level).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_category = BTreeMap::new();
        let mut by_risk_level = BTreeMap::new();
        for tool in &self.tools {
            *by_category.entry(tool.category).or_insert(0) += 1;
            *by_risk_level.entry(tool.risk_level).or_insert(0) += 1;
        }
        RegistryStats {
            total: self.tools.len(),
            by_category,
            by_risk_level,
        }
    }

    pub fn llm_definitions(&self) -> Vec<loom_llm::ToolDefinition> {
        self.tools.iter().map(ToolDefinition::to_llm).collect()
    }
}
