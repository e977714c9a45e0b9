//! 行类型、快照与派生金额
//!
//! 金额永不落库，读取时重算。总额的调整顺序固定为
//! 折扣 → 服务费 → VAT：
//! `total = subtotal * (1 - discount/100) * (1 + service/100) * (1 + tax/100)`。
//! 换一个顺序会改变最终数字，所以顺序钉死在这里并有测试把守。
//! 人均调整额按 raw_total / subtotal 比例分摊；subtotal 为 0 时定义为 0。

use serde::{Deserialize, Serialize};

/// sessions 表的一行；`tax` 对外叫 `vat`（见 contract）
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: i64,
    pub title: String,
    pub tax: f64,
    pub service: f64,
    pub discount: f64,
    pub created_at: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersonRow {
    pub id: i64,
    pub session_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub person_id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
}

impl ItemRow {
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }
}

/// 只读快照：会话字段 + 嵌套人员/菜目 + 全部派生金额
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: i64,
    pub title: String,
    #[serde(rename = "vat")]
    pub tax: f64,
    pub service: f64,
    pub discount: f64,
    pub created_at: String,
    pub subtotal: f64,
    pub total: f64,
    pub people: Vec<PersonSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonSnapshot {
    pub id: i64,
    pub name: String,
    pub raw_total: f64,
    pub adjusted_total: f64,
    pub items: Vec<ItemSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: i64,
    pub name: String,
    pub price: f64,
    pub quantity: i64,
    pub line_total: f64,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// 固定顺序的总额计算：折扣 → 服务费 → VAT
pub fn grand_total(subtotal: f64, tax: f64, service: f64, discount: f64) -> f64 {
    round2(subtotal * (1.0 - discount / 100.0) * (1.0 + service / 100.0) * (1.0 + tax / 100.0))
}

/// 从行数据组装快照；people/items 需按所属关系预先分组好（同序遍历）
pub fn assemble_snapshot(
    session: SessionRow,
    people: Vec<PersonRow>,
    items: Vec<ItemRow>,
) -> SessionSnapshot {
    let mut person_snaps: Vec<PersonSnapshot> = people
        .into_iter()
        .map(|p| {
            let items: Vec<ItemSnapshot> = items
                .iter()
                .filter(|i| i.person_id == p.id)
                .map(|i| ItemSnapshot {
                    id: i.id,
                    name: i.name.clone(),
                    price: i.price,
                    quantity: i.quantity,
                    line_total: round2(i.line_total()),
                })
                .collect();
            let raw_total = round2(items.iter().map(|i| i.line_total).sum());
            PersonSnapshot {
                id: p.id,
                name: p.name,
                raw_total,
                adjusted_total: 0.0,
                items,
            }
        })
        .collect();

    let subtotal = round2(person_snaps.iter().map(|p| p.raw_total).sum());
    let total = grand_total(subtotal, session.tax, session.service, session.discount);

    // 比例分摊；subtotal 为 0 时所有人为 0
    for p in &mut person_snaps {
        p.adjusted_total = if subtotal == 0.0 {
            0.0
        } else {
            round2(total * p.raw_total / subtotal)
        };
    }

    SessionSnapshot {
        id: session.id,
        title: session.title,
        tax: session.tax,
        service: session.service,
        discount: session.discount,
        created_at: session.created_at,
        subtotal,
        total,
        people: person_snaps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(tax: f64, service: f64, discount: f64) -> SessionRow {
        SessionRow {
            id: 1,
            title: "Dinner".into(),
            tax,
            service,
            discount,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn dinner_scenario_totals() {
        // 120 → 折扣 0% → 服务费 10% (132) → VAT 14% (150.48)
        let snap = assemble_snapshot(
            session(14.0, 10.0, 0.0),
            vec![PersonRow {
                id: 1,
                session_id: 1,
                name: "Ali".into(),
            }],
            vec![ItemRow {
                id: 1,
                person_id: 1,
                name: "Burger".into(),
                price: 120.0,
                quantity: 1,
            }],
        );
        assert_eq!(snap.subtotal, 120.0);
        assert_eq!(snap.total, 150.48);
        assert_eq!(snap.people[0].adjusted_total, 150.48);
    }

    #[test]
    fn adjustment_order_is_discount_then_service_then_vat() {
        // 100 → 折扣 50% (50) → 服务费 100% (100) → VAT 100% (200)
        // 若顺序不同（如先 VAT 再折扣），结果不会是 200
        assert_eq!(grand_total(100.0, 100.0, 100.0, 50.0), 200.0);
    }

    #[test]
    fn adjusted_totals_are_proportional() {
        let snap = assemble_snapshot(
            session(0.0, 0.0, 50.0),
            vec![
                PersonRow {
                    id: 1,
                    session_id: 1,
                    name: "A".into(),
                },
                PersonRow {
                    id: 2,
                    session_id: 1,
                    name: "B".into(),
                },
            ],
            vec![
                ItemRow {
                    id: 1,
                    person_id: 1,
                    name: "x".into(),
                    price: 30.0,
                    quantity: 1,
                },
                ItemRow {
                    id: 2,
                    person_id: 2,
                    name: "y".into(),
                    price: 10.0,
                    quantity: 1,
                },
            ],
        );
        assert_eq!(snap.subtotal, 40.0);
        assert_eq!(snap.total, 20.0);
        assert_eq!(snap.people[0].adjusted_total, 15.0);
        assert_eq!(snap.people[1].adjusted_total, 5.0);
    }

    #[test]
    fn zero_subtotal_defines_adjusted_as_zero() {
        let snap = assemble_snapshot(
            session(14.0, 10.0, 5.0),
            vec![PersonRow {
                id: 1,
                session_id: 1,
                name: "A".into(),
            }],
            vec![],
        );
        assert_eq!(snap.subtotal, 0.0);
        assert_eq!(snap.people[0].adjusted_total, 0.0);
    }

    #[test]
    fn quantity_multiplies_line_total() {
        let row = ItemRow {
            id: 1,
            person_id: 1,
            name: "Tea".into(),
            price: 7.5,
            quantity: 4,
        };
        assert_eq!(row.line_total(), 30.0);
    }

    #[test]
    fn snapshot_serializes_tax_as_vat() {
        let snap = assemble_snapshot(session(14.0, 0.0, 0.0), vec![], vec![]);
        let wire = serde_json::to_value(&snap).unwrap();
        assert_eq!(wire["vat"], serde_json::json!(14.0));
        assert!(wire.get("tax").is_none());
    }
}
