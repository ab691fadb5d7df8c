//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和启动顺序解析。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图（模块 ID 数组 + 基于下标的边）
//! - [`resolve_start_order`] - 从模块描述直接求出启动顺序
//!
//! 依赖图是派生数据：每次解析时从当前已加载的模块描述重新构建，
//! 在一次启动/停止/关闭操作期间作为只读快照使用。
//!
//! # 示例
//!
//! ```rust
//! use chips_lifecycle::module::dependency::DependencyGraph;
//! use chips_lifecycle::module::ModuleDescriptor;
//!
//! let descriptors = vec![
//!     ModuleDescriptor::new("app", "1.0.0").requires("service"),
//!     ModuleDescriptor::new("service", "1.0.0").requires("database"),
//!     ModuleDescriptor::new("database", "1.0.0"),
//! ];
//!
//! let graph = DependencyGraph::build(&descriptors).unwrap();
//! assert_eq!(graph.start_order().unwrap(), vec!["database", "service", "app"]);
//! assert!(graph.transitive_dependents("database").contains("app"));
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::module::metadata::ModuleDescriptor;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 节点按模块 ID 升序存放在数组中，边以下标表示。
/// 因为下标顺序与 ID 字典序一致，拓扑排序时按下标选择
/// 就能得到"无约束时按 ID 升序"的确定性结果。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 模块 ID，按升序排列
    ids: Vec<String>,
    /// 模块 ID -> 下标
    index: HashMap<String, usize>,
    /// 正向边：下标 -> 该模块依赖的模块下标
    requires: Vec<Vec<usize>>,
    /// 反向边：下标 -> 依赖该模块的模块下标
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 从模块描述构建依赖图
    ///
    /// # 错误
    ///
    /// - `CoreError::InvalidMetadata` - 描述中存在重复的模块 ID
    /// - `CoreError::MissingDependency` - 某个声明的依赖不在描述集合中
    ///
    /// 循环依赖不会在构建时报错，由 [`start_order`](Self::start_order) 检出。
    pub fn build<'a, I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ModuleDescriptor>,
    {
        let mut sorted: Vec<&ModuleDescriptor> = descriptors.into_iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut ids = Vec::with_capacity(sorted.len());
        let mut index = HashMap::with_capacity(sorted.len());
        for descriptor in &sorted {
            if index.insert(descriptor.id.clone(), ids.len()).is_some() {
                return Err(CoreError::InvalidMetadata(format!(
                    "重复的模块 ID: '{}'",
                    descriptor.id
                )));
            }
            ids.push(descriptor.id.clone());
        }

        let mut requires = vec![Vec::new(); ids.len()];
        let mut dependents = vec![Vec::new(); ids.len()];
        for (node, descriptor) in sorted.iter().enumerate() {
            for dep_id in &descriptor.required_module_ids {
                let dep = *index.get(dep_id).ok_or_else(|| CoreError::MissingDependency {
                    module: descriptor.id.clone(),
                    dependency: dep_id.clone(),
                })?;
                requires[node].push(dep);
                dependents[dep].push(node);
            }
        }

        Ok(Self {
            ids,
            index,
            requires,
            dependents,
        })
    }

    /// 获取图中模块数量
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// 检查图是否为空
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 检查是否包含指定模块
    pub fn contains(&self, module_id: &str) -> bool {
        self.index.contains_key(module_id)
    }

    /// 获取所有模块 ID（升序）
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// 获取模块的直接依赖
    pub fn dependencies(&self, module_id: &str) -> Vec<&str> {
        self.neighbours(module_id, &self.requires)
    }

    /// 获取直接依赖该模块的模块
    pub fn dependents(&self, module_id: &str) -> Vec<&str> {
        self.neighbours(module_id, &self.dependents)
    }

    /// 获取所有直接或间接依赖该模块的模块（反向可达集合）
    ///
    /// 结果不包含模块自身；用于计算级联停止的范围。
    pub fn transitive_dependents(&self, module_id: &str) -> BTreeSet<String> {
        self.reachable(module_id, &self.dependents)
    }

    /// 获取模块的所有直接和间接依赖（正向可达集合）
    pub fn transitive_dependencies(&self, module_id: &str) -> BTreeSet<String> {
        self.reachable(module_id, &self.requires)
    }

    /// 检测是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找循环依赖路径
    ///
    /// 使用深度优先搜索，按下标顺序遍历，结果是确定的。
    /// 返回的路径首尾为同一模块（闭合循环），例如 `a -> b -> a`。
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = vec![false; self.ids.len()];
        let mut on_stack = vec![false; self.ids.len()];
        let mut path = Vec::new();

        for node in 0..self.ids.len() {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut on_stack, &mut path)
            {
                return Some(cycle.into_iter().map(|i| self.ids[i].clone()).collect());
            }
        }
        None
    }

    fn find_cycle_util(
        &self,
        node: usize,
        visited: &mut [bool],
        on_stack: &mut [bool],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        if on_stack[node] {
            // 找到循环，从路径中截取并闭合
            let start = path.iter().position(|&n| n == node)?;
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if visited[node] {
            return None;
        }

        visited[node] = true;
        on_stack[node] = true;
        path.push(node);

        for &dep in &self.requires[node] {
            if let Some(cycle) = self.find_cycle_util(dep, visited, on_stack, path) {
                return Some(cycle);
            }
        }

        path.pop();
        on_stack[node] = false;
        None
    }

    /// 计算启动顺序（Kahn 算法）
    ///
    /// 保证每个模块的依赖都排在它之前；没有相对约束的模块按 ID 升序排列。
    ///
    /// # 错误
    ///
    /// 如果存在循环依赖，返回 `CoreError::CircularDependency`，携带参与循环的模块。
    pub fn start_order(&self) -> Result<Vec<String>> {
        // 入度 = 尚未输出的依赖数
        let mut in_degree: Vec<usize> = self.requires.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| node)
            .collect();

        let mut order = Vec::with_capacity(self.ids.len());
        while let Some(node) = ready.pop_first() {
            order.push(self.ids[node].clone());
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.ids.len() {
            let cycle = self.find_cycle().unwrap_or_else(|| {
                // 理论上不会发生：排序未完成必然存在环
                in_degree
                    .iter()
                    .enumerate()
                    .filter(|(_, &degree)| degree > 0)
                    .map(|(node, _)| self.ids[node].clone())
                    .collect()
            });
            return Err(CoreError::CircularDependency(cycle));
        }

        Ok(order)
    }

    /// 计算停止顺序（启动顺序的反序）
    ///
    /// 依赖方总是先于被依赖方停止。
    pub fn stop_order(&self) -> Result<Vec<String>> {
        let mut order = self.start_order()?;
        order.reverse();
        Ok(order)
    }

    /// 计算指定子集的启动顺序
    ///
    /// 结果是完整启动顺序中属于 `subset` 的部分，相对顺序不变。
    /// 不在图中的 ID 会被忽略。
    pub fn start_order_for(&self, subset: &BTreeSet<String>) -> Result<Vec<String>> {
        Ok(self
            .start_order()?
            .into_iter()
            .filter(|id| subset.contains(id))
            .collect())
    }

    fn neighbours<'g>(&'g self, module_id: &str, edges: &'g [Vec<usize>]) -> Vec<&'g str> {
        self.index
            .get(module_id)
            .map(|&node| edges[node].iter().map(|&n| self.ids[n].as_str()).collect())
            .unwrap_or_default()
    }

    fn reachable(&self, module_id: &str, edges: &[Vec<usize>]) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let Some(&start) = self.index.get(module_id) else {
            return result;
        };

        let mut seen = vec![false; self.ids.len()];
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &next in &edges[node] {
                if !seen[next] {
                    seen[next] = true;
                    result.insert(self.ids[next].clone());
                    queue.push_back(next);
                }
            }
        }
        result
    }
}

/// 从模块描述求出启动顺序
///
/// 等价于 `DependencyGraph::build(descriptors)?.start_order()`。
pub fn resolve_start_order<'a, I>(descriptors: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = &'a ModuleDescriptor>,
{
    DependencyGraph::build(descriptors)?.start_order()
}
